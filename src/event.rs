//! The scheduled item a controller enqueues and later dequeues.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::continuation::{ContinuationId, Outcome};
use crate::entity::{EntityId, EventId};
use crate::value::Args;

/// A cancellation flag shared between the queue entry and whoever posted it.
///
/// Cloning an `EventHandle` gives another reference to the same flag;
/// [`cancel`](EventHandle::cancel) is idempotent and visible to the queue the
/// next time it evicts cancelled entries from the top of the heap. `Arc`
/// rather than `Rc` because a `RealTimeController`'s driver thread and the
/// thread that posted the event may each hold a copy.
#[derive(Clone, Debug)]
pub struct EventHandle(Arc<AtomicBool>);

impl EventHandle {
    pub(crate) fn new() -> Self {
        EventHandle(Arc::new(AtomicBool::new(false)))
    }

    /// Marks the event cancelled. Has no effect if it already dispatched.
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }
}

/// What happens when an [`EventRecord`] is dequeued.
pub(crate) enum EventKind {
    /// Deliver `args` to `target.invoke(event_id, ..)`. `caller` is `Some`
    /// iff this was posted by a blocking call awaiting a reply.
    Invoke {
        target: EntityId,
        event_id: EventId,
        args: Args,
        caller: Option<ContinuationId>,
    },
    /// Resume a parked continuation with its outcome.
    Reply {
        continuation: ContinuationId,
        outcome: Outcome,
    },
}

/// One entry in the event queue.
///
/// Total order is `(time asc, seq asc)`; two records are never equal, so
/// insertion order deterministically breaks ties.
pub(crate) struct EventRecord {
    pub(crate) time: u64,
    pub(crate) seq: u64,
    pub(crate) kind: EventKind,
    pub(crate) handle: EventHandle,
}

impl EventRecord {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for EventRecord {}

impl PartialOrd for EventRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reversed so that `BinaryHeap`, a max-heap, surfaces the smallest
/// `(time, seq)` pair at its top.
impl Ord for EventRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}
