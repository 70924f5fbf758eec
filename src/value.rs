//! Dynamically-typed event arguments and return values.
//!
//! The wire type of an event's `args` and return value is left abstract,
//! since entities are dynamically typed and exchange values without a shared
//! static type. `Value` picks the same type-erasure idiom `uringy::runtime::JoinHandle` already
//! uses for a fiber's panic payload (`Box<dyn Any + Send + 'static>`). The
//! `RealTimeController`'s driver runs on its own thread, so unlike that
//! payload this one keeps the `Send` bound rather than dropping it.

use std::any::Any;
use std::fmt;

/// A single dynamically-typed argument or return value.
pub type Value = Box<dyn Any + Send>;

/// The ordered argument list passed to [`Entity::invoke`](crate::entity::Entity::invoke).
pub type Args = Vec<Value>;

/// Boxes `v` as a [`Value`].
pub fn pack<T: Any + Send>(v: T) -> Value {
    Box::new(v)
}

/// Downcasts a [`Value`] back to `T`.
///
/// # Panics
/// Panics if `v` doesn't actually hold a `T`. Entities and their callers are
/// expected to agree on argument types via the event id's signature, the
/// same way the (out-of-scope) proxy layer would have generated matching
/// call sites.
pub fn unpack<T: Any>(v: Value) -> T {
    match v.downcast::<T>() {
        Ok(boxed) => *boxed,
        Err(_) => panic!("value type mismatch: expected {}", std::any::type_name::<T>()),
    }
}

/// Downcasts without panicking, returning the original box on mismatch.
pub fn try_unpack<T: Any>(v: Value) -> Result<T, Value> {
    v.downcast::<T>().map(|boxed| *boxed)
}

/// A ready-made `Value` for events with no meaningful return.
pub fn unit() -> Value {
    pack(())
}

pub(crate) struct DebugValue<'a>(pub &'a Value);

impl fmt::Debug for DebugValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_pack_and_unpack() {
        let v = pack(42i32);
        assert_eq!(unpack::<i32>(v), 42);
    }

    #[test]
    fn try_unpack_fails_on_mismatch() {
        let v = pack(42i32);
        assert!(try_unpack::<String>(v).is_err());
    }
}
