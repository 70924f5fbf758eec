//! Parked computations awaiting a reply, realized as OS threads handed off
//! to one another through a dedicated condvar per suspension point.
//!
//! Every dispatched `Invoke` runs `entity.invoke()` on a dedicated OS thread
//! for that call's entire lifetime. The thread's own native stack is its
//! continuation, preserved across however many blocking calls it makes one
//! after another. A [`Handoff`] (one per in-flight invoke-call) and a
//! [`ParkSlot`] (one per individual suspension point) guarantee exactly one
//! thread is ever actually running simulation code.
//! [`dispatcher`](crate::dispatcher) always blocks on a `Handoff`'s condvar
//! until the thread it just started or woke either parks again or finishes,
//! before it pops the next queued event. The controller never preempts a
//! running frame.

use std::cell::RefCell;
use std::sync::{Arc, Condvar, Mutex};

use slab::Slab;

use crate::error::{Error, Result};
use crate::value::Value;

pub(crate) type ContinuationId = usize;

/// The value or error a parked caller resumes with.
#[derive(Debug)]
pub(crate) enum Outcome {
    Value(Value),
    Error(Error),
}

pub(crate) fn outcome_to_result(outcome: Outcome) -> Result<Value> {
    match outcome {
        Outcome::Value(v) => Ok(v),
        Outcome::Error(e) => Err(e),
    }
}

enum ParkState {
    Parked,
    Ready(Outcome),
}

/// What a blocked invoke-thread waits on between suspension and the moment
/// its `Reply` (or a cancellation) delivers an outcome.
pub(crate) struct ParkSlot {
    state: Mutex<ParkState>,
    ready: Condvar,
}

impl ParkSlot {
    fn new() -> Arc<Self> {
        Arc::new(ParkSlot {
            state: Mutex::new(ParkState::Parked),
            ready: Condvar::new(),
        })
    }

    /// Delivers `outcome`, waking whoever is blocked in [`Self::wait`]. Safe
    /// to call before anyone has started waiting. The outcome is stored,
    /// not just signalled, so a late `wait()` sees it immediately.
    pub(crate) fn resolve(&self, outcome: Outcome) {
        let mut state = self.state.lock().unwrap();
        *state = ParkState::Ready(outcome);
        self.ready.notify_one();
    }

    /// Blocks the calling thread until [`Self::resolve`] delivers an outcome.
    pub(crate) fn wait(&self) -> Outcome {
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                ParkState::Ready(_) => break,
                ParkState::Parked => state = self.ready.wait(state).unwrap(),
            }
        }
        match std::mem::replace(&mut *state, ParkState::Parked) {
            ParkState::Ready(outcome) => outcome,
            ParkState::Parked => unreachable!("just matched Ready above"),
        }
    }
}

/// What an invoke-call's dedicated thread is doing, from the dispatcher's
/// point of view.
pub(crate) enum Transition {
    /// Parked on a continuation id, awaiting its `Reply`.
    Parked(ContinuationId),
    /// `entity.invoke()` returned. Also covers the kernel rejecting the call
    /// before ever reaching it: an unregistered target, or a reentrant one.
    Done(Result<Value>),
}

enum RawTransition {
    Running,
    Settled(Transition),
}

/// Owned by one dispatched `Invoke` event for the lifetime of its thread,
/// however many sequential blocking calls that thread makes along the way.
/// The dispatcher waits on it after every spawn or resume; the thread
/// reports through it every time it's about to park or finish.
pub(crate) struct Handoff {
    transition: Mutex<RawTransition>,
    settled: Condvar,
    /// The continuation to reply to once this whole invoke-call is `Done`;
    /// `None` for a fire-and-forget (non-blocking) dispatch.
    pub(crate) caller: Option<ContinuationId>,
}

impl Handoff {
    pub(crate) fn new(caller: Option<ContinuationId>) -> Arc<Self> {
        Arc::new(Handoff {
            transition: Mutex::new(RawTransition::Running),
            settled: Condvar::new(),
            caller,
        })
    }

    /// Called by the invoke-thread just before it blocks on a `ParkSlot`.
    pub(crate) fn report_parked(&self, id: ContinuationId) {
        let mut transition = self.transition.lock().unwrap();
        *transition = RawTransition::Settled(Transition::Parked(id));
        self.settled.notify_one();
    }

    /// Called by the invoke-thread once `entity.invoke()` has returned.
    pub(crate) fn report_done(&self, result: Result<Value>) {
        let mut transition = self.transition.lock().unwrap();
        *transition = RawTransition::Settled(Transition::Done(result));
        self.settled.notify_one();
    }

    /// Blocks until the thread reports a transition, resetting to `Running`
    /// afterward so the *next* `wait` correctly blocks again.
    pub(crate) fn wait(&self) -> Transition {
        let mut transition = self.transition.lock().unwrap();
        loop {
            if matches!(&*transition, RawTransition::Settled(_)) {
                break;
            }
            transition = self.settled.wait(transition).unwrap();
        }
        match std::mem::replace(&mut *transition, RawTransition::Running) {
            RawTransition::Settled(t) => t,
            RawTransition::Running => unreachable!("just matched Settled above"),
        }
    }
}

thread_local! {
    /// Set for the lifetime of an invoke-thread's closure; `None` on the
    /// controller's own thread. This is how blocking calls detect they were
    /// made from outside a dispatched event, which rejects with
    /// `IllegalState`.
    static CURRENT_HANDOFF: RefCell<Option<Arc<Handoff>>> = const { RefCell::new(None) };
}

/// Marks the calling thread as the home of `handoff` for as long as `f` runs.
pub(crate) fn with_current_handoff<R>(handoff: Arc<Handoff>, f: impl FnOnce() -> R) -> R {
    CURRENT_HANDOFF.with(|cell| *cell.borrow_mut() = Some(handoff));
    let result = f();
    CURRENT_HANDOFF.with(|cell| *cell.borrow_mut() = None);
    result
}

/// The current thread's `Handoff`, if it's an invoke-thread.
pub(crate) fn current_handoff() -> Option<Arc<Handoff>> {
    CURRENT_HANDOFF.with(|cell| cell.borrow().clone())
}

struct Entry {
    park_slot: Arc<ParkSlot>,
    handoff: Arc<Handoff>,
}

/// Owns every in-flight continuation for one controller: one entry per
/// currently-parked suspension point, keyed by the id its `Reply` event
/// carries.
#[derive(Default)]
pub(crate) struct ContinuationTable {
    slots: Slab<Entry>,
}

impl ContinuationTable {
    pub(crate) fn new() -> Self {
        ContinuationTable { slots: Slab::new() }
    }

    /// Reserves a fresh id and its `ParkSlot`, associated with `handoff` (the
    /// invoke-thread that will eventually block on it).
    pub(crate) fn create(&mut self, handoff: Arc<Handoff>) -> ContinuationId {
        self.slots.insert(Entry {
            park_slot: ParkSlot::new(),
            handoff,
        })
    }

    /// A clone of `id`'s `ParkSlot`, without removing the entry.
    pub(crate) fn park_slot(&self, id: ContinuationId) -> Option<Arc<ParkSlot>> {
        self.slots.get(id).map(|entry| entry.park_slot.clone())
    }

    /// Removes and returns `id`'s `(ParkSlot, Handoff)` pair. Replies are
    /// one-shot: a companion timeout racing an already-delivered reply (or
    /// vice versa) finds nothing here the second time and is silently
    /// dropped.
    pub(crate) fn take(&mut self, id: ContinuationId) -> Option<(Arc<ParkSlot>, Arc<Handoff>)> {
        if self.slots.contains(id) {
            let entry = self.slots.remove(id);
            Some((entry.park_slot, entry.handoff))
        } else {
            None
        }
    }

    /// Every id currently parked, for `Controller::close`'s cancellation
    /// sweep.
    pub(crate) fn parked_ids(&self) -> Vec<ContinuationId> {
        self.slots.iter().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{pack, unpack};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn park_slot_resolve_before_wait_is_not_lost() {
        let slot = ParkSlot::new();
        slot.resolve(Outcome::Value(pack(7i32)));
        match slot.wait() {
            Outcome::Value(v) => assert_eq!(unpack::<i32>(v), 7),
            Outcome::Error(_) => panic!("expected a value"),
        }
    }

    #[test]
    fn park_slot_wakes_a_thread_already_waiting() {
        let slot = Arc::new(ParkSlot {
            state: Mutex::new(ParkState::Parked),
            ready: Condvar::new(),
        });
        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || match slot.wait() {
                Outcome::Value(v) => unpack::<i32>(v),
                Outcome::Error(_) => panic!("expected a value"),
            })
        };
        thread::sleep(Duration::from_millis(20));
        slot.resolve(Outcome::Value(pack(42i32)));
        assert_eq!(waiter.join().unwrap(), 42);
    }

    #[test]
    fn handoff_wait_reports_parked_then_done() {
        let handoff = Handoff::new(None);
        handoff.report_parked(3);
        assert!(matches!(handoff.wait(), Transition::Parked(3)));
        handoff.report_done(Ok(pack(())));
        assert!(matches!(handoff.wait(), Transition::Done(Ok(_))));
    }

    #[test]
    fn continuation_table_take_is_one_shot() {
        let mut table = ContinuationTable::new();
        let handoff = Handoff::new(None);
        let id = table.create(handoff);
        assert!(table.take(id).is_some());
        assert!(table.take(id).is_none());
    }

    #[test]
    fn parked_ids_lists_every_live_entry() {
        let mut table = ContinuationTable::new();
        let a = table.create(Handoff::new(None));
        let b = table.create(Handoff::new(None));
        let mut ids = table.parked_ids();
        ids.sort();
        assert_eq!(ids, vec![a, b]);
    }
}
