//! Kernel and user error kinds.

use thiserror::Error;

/// Everything that can go wrong while driving a simulation.
///
/// `IllegalState` and `UnknownEvent` are kernel errors: they're surfaced
/// synchronously to whoever made the offending call and are fatal to the
/// current dispatch. `UserError` is whatever an entity's `invoke` raised; it
/// propagates to a blocking caller via the reply path, or is logged and
/// swallowed if nobody was waiting on it. `ChannelClosed`, `Timeout` and
/// `Cancelled` are ordinary control-flow outcomes delivered at the
/// suspension point where the caller was parked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("blocking call issued outside of an active event dispatch")]
    IllegalState,

    #[error("entity has no event with id {event_id}")]
    UnknownEvent { event_id: crate::entity::EventId },

    #[error("channel is closed")]
    ChannelClosed,

    #[error("blocking call timed out")]
    Timeout,

    #[error("continuation was cancelled")]
    Cancelled,

    #[error("{0}")]
    UserError(String),

    /// An entity was invoked again while an earlier call to it was still
    /// live, either running or parked on a blocking call. An entity may have
    /// at most one actively executing frame at a time; the entity's own
    /// `Mutex` is already held by that first call's invoke-thread, so the
    /// second dispatch is rejected outright rather than queued or blocked on.
    #[error("entity {target} invoked reentrantly while a prior call was still suspended")]
    EntityBusy { target: crate::entity::EntityId },
}

pub type Result<T> = std::result::Result<T, Error>;
