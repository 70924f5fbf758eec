//! Dispatches queued events and drives blocking calls.
//!
//! Every dispatched `Invoke` runs on a dedicated OS thread for the lifetime
//! of that call (see [`crate::continuation`] for why). The functions here
//! are the other half of that design: they own the single "driver" loop that
//! pops events off the queue, and for each one either spawns a fresh
//! invoke-thread or wakes an existing parked one, then blocks on its
//! [`Handoff`] until that thread reports its next park-or-finish before
//! moving on to the next event. That's what keeps dispatch strictly
//! single-threaded from the simulation's point of view even though real OS
//! threads are involved.

use std::sync::Arc;
use std::thread;

use tracing::warn;

use crate::continuation::{self, ContinuationId, Handoff, Outcome, Transition};
use crate::controller::{ControllerState, Kernel};
use crate::entity::{EntityId, EventId};
use crate::error::{Error, Result};
use crate::event::{EventHandle, EventKind, EventRecord};
use crate::value::{unit, Args, Value};

/// Enqueues a non-blocking `Invoke` at `time`, owning no caller continuation.
pub(crate) fn enqueue_invoke(
    kernel: &Kernel,
    time: u64,
    target: EntityId,
    event_id: EventId,
    args: Args,
    caller: Option<ContinuationId>,
) -> EventHandle {
    let mut core = kernel.lock().unwrap();
    let seq = core.seq.next();
    let handle = EventHandle::new();
    core.queue.push(EventRecord {
        time,
        seq,
        kind: EventKind::Invoke {
            target,
            event_id,
            args,
            caller,
        },
        handle: handle.clone(),
    });
    handle
}

fn enqueue_reply(kernel: &Kernel, time: u64, continuation: ContinuationId, outcome: Outcome) {
    let mut core = kernel.lock().unwrap();
    let seq = core.seq.next();
    core.queue.push(EventRecord {
        time,
        seq,
        kind: EventKind::Reply { continuation, outcome },
        handle: EventHandle::new(),
    });
}

/// Dequeues and dispatches exactly one event. Returns `false` if the queue
/// was empty.
pub(crate) fn run_one(kernel: &Kernel) -> Result<bool> {
    let event = {
        let mut core = kernel.lock().unwrap();
        match core.queue.pop_min() {
            Some(event) => event,
            None => return Ok(false),
        }
    };

    {
        let mut core = kernel.lock().unwrap();
        core.clock.advance_to(event.time);
    }
    dispatch(kernel, event)?;
    Ok(true)
}

fn dispatch(kernel: &Kernel, event: EventRecord) -> Result<()> {
    match event.kind {
        EventKind::Invoke {
            target,
            event_id,
            args,
            caller,
        } => dispatch_invoke(kernel, target, event_id, args, caller),
        EventKind::Reply { continuation, outcome } => dispatch_reply(kernel, continuation, outcome),
    }
}

/// Runs `entity.invoke()` on the current (invoke-) thread. Called only from
/// inside the closure [`spawn_invoke`] hands to `thread::spawn`.
fn run_invoke(kernel: &Kernel, target: EntityId, event_id: EventId, args: Args, time: u64) -> Result<Value> {
    let (entity, class_name) = {
        let core = kernel.lock().unwrap();
        let entity = core.registry.lookup(target);
        let class_name = core.registry.class_name(target).map(str::to_string);
        (entity, class_name)
    };

    let Some(entity) = entity else {
        warn!(target_id = target, event_id, "dropping event for unregistered entity");
        return Err(Error::UnknownEvent { event_id });
    };

    // An entity has at most one actively executing frame at a time. A
    // second `Invoke` arriving while the entity's own invoke-thread
    // is still running (parked or not) finds the entity's mutex held and is
    // rejected rather than queued or blocked on.
    let mut guard = match entity.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            warn!(target_id = target, event_id, "entity invoked reentrantly, rejecting");
            return Err(Error::EntityBusy { target });
        }
    };

    let class_name = class_name.unwrap_or_default();
    kernel.lock().unwrap().spectrum.record_dispatch(&class_name, event_id, time);

    guard.invoke(event_id, args)
}

/// Spawns the OS thread backing one invoke-call, registering it as the
/// current thread's [`Handoff`] for the whole closure's lifetime.
fn spawn_invoke(kernel: Kernel, handoff: Arc<Handoff>, target: EntityId, event_id: EventId, args: Args, time: u64) {
    let for_thread = handoff.clone();
    thread::spawn(move || {
        continuation::with_current_handoff(for_thread.clone(), || {
            let result = run_invoke(&kernel, target, event_id, args, time);
            for_thread.report_done(result);
        });
    });
}

/// Blocks on `handoff` until its thread reports a transition, then either
/// leaves the continuation parked (nothing more to do right now) or posts
/// the reply its caller is waiting on.
fn drive(kernel: &Kernel, handoff: &Arc<Handoff>) -> Result<()> {
    match handoff.wait() {
        Transition::Parked(_id) => Ok(()),
        Transition::Done(result) => {
            if let Some(caller) = handoff.caller {
                let now = kernel.lock().unwrap().clock.now();
                match result {
                    Ok(value) => enqueue_reply(kernel, now, caller, Outcome::Value(value)),
                    Err(err) => enqueue_reply(kernel, now, caller, Outcome::Error(err)),
                }
            } else if let Err(err) = result {
                warn!(error = %err, "unhandled error from fire-and-forget invoke");
            }
            Ok(())
        }
    }
}

fn dispatch_invoke(
    kernel: &Kernel,
    target: EntityId,
    event_id: EventId,
    args: Args,
    caller: Option<ContinuationId>,
) -> Result<()> {
    let time = kernel.lock().unwrap().clock.now();
    let handoff = Handoff::new(caller);
    spawn_invoke(kernel.clone(), handoff.clone(), target, event_id, args, time);
    drive(kernel, &handoff)
}

fn dispatch_reply(kernel: &Kernel, continuation: ContinuationId, outcome: Outcome) -> Result<()> {
    let entry = kernel.lock().unwrap().continuations.take(continuation);
    let Some((park_slot, handoff)) = entry else {
        // The continuation already settled through some other path (e.g. a
        // companion timeout raced an on-time reply); first resolution wins.
        return Ok(());
    };
    park_slot.resolve(outcome);
    drive(kernel, &handoff)
}

/// Force-settles `id` with [`Error::Cancelled`] and drives its thread to its
/// next park or finish, cascading onto that thread's own caller (and so on)
/// so every affected frame observes the cancellation before `close` returns.
fn cancel_one(kernel: &Kernel, id: ContinuationId) {
    let entry = kernel.lock().unwrap().continuations.take(id);
    let Some((park_slot, handoff)) = entry else {
        return;
    };
    park_slot.resolve(Outcome::Error(Error::Cancelled));
    match handoff.wait() {
        Transition::Parked(new_id) => cancel_one(kernel, new_id),
        Transition::Done(_) => {
            if let Some(caller) = handoff.caller {
                cancel_one(kernel, caller);
            }
        }
    }
}

/// Cancels every continuation currently parked, for
/// [`ControllerHandle::close`](crate::controller::ControllerHandle::close).
pub(crate) fn cancel_all(kernel: &Kernel) {
    for id in kernel.lock().unwrap().continuations.parked_ids() {
        cancel_one(kernel, id);
    }
}

fn require_dispatching() -> Result<Arc<Handoff>> {
    continuation::current_handoff().ok_or(Error::IllegalState)
}

fn require_not_stopped(kernel: &Kernel) -> Result<()> {
    if kernel.lock().unwrap().state == ControllerState::Stopped {
        return Err(Error::IllegalState);
    }
    Ok(())
}

/// Parks a new continuation without enqueuing any `Invoke`. For primitives
/// like [`crate::sync::channel::Channel`] that resume a caller by some means
/// other than replying to a posted event.
pub(crate) fn park(kernel: &Kernel) -> Result<ContinuationId> {
    let handoff = require_dispatching()?;
    require_not_stopped(kernel)?;
    Ok(kernel.lock().unwrap().continuations.create(handoff))
}

/// Resolves `id` via a `Reply` event at the current instant, so it picks up
/// a fresh `seq` the same way a normal invoke reply would, so it's ordered
/// after anything the resumed caller itself scheduled at this instant.
pub(crate) fn settle_now(kernel: &Kernel, continuation: ContinuationId, outcome: Outcome) {
    let now = kernel.lock().unwrap().clock.now();
    enqueue_reply(kernel, now, continuation, outcome);
}

/// Blocks the calling invoke-thread until `id` settles, handing control back
/// to the driver for as long as that takes.
pub(crate) fn block_on(kernel: &Kernel, id: ContinuationId) -> Result<Value> {
    let handoff = require_dispatching()?;
    let park_slot = kernel
        .lock()
        .unwrap()
        .continuations
        .park_slot(id)
        .expect("block_on called with an id that was never parked");
    handoff.report_parked(id);
    continuation::outcome_to_result(park_slot.wait())
}

/// Blocking call: posts `(target, event_id, args)` and does not return until
/// its `Reply` is dispatched.
pub(crate) fn post_continuing(kernel: &Kernel, target: EntityId, event_id: EventId, args: Args) -> Result<Value> {
    require_not_stopped(kernel)?;
    let id = park(kernel)?;
    let now = kernel.lock().unwrap().clock.now();
    enqueue_invoke(kernel, now, target, event_id, args, Some(id));
    block_on(kernel, id)
}

/// Like [`post_continuing`], but resolves with [`Error::Timeout`] if the
/// reply hasn't arrived within `timeout` virtual-time units.
pub(crate) fn post_continuing_timeout(
    kernel: &Kernel,
    target: EntityId,
    event_id: EventId,
    args: Args,
    timeout: u64,
) -> Result<Value> {
    require_not_stopped(kernel)?;
    let id = park(kernel)?;
    let now = kernel.lock().unwrap().clock.now();
    enqueue_invoke(kernel, now, target, event_id, args, Some(id));
    enqueue_reply(kernel, now + timeout, id, Outcome::Error(Error::Timeout));
    block_on(kernel, id)
}

/// `sleep(d)`: parks for `d` virtual units with no callee to invoke.
pub(crate) fn sleep(kernel: &Kernel, delay: u64) -> Result<()> {
    require_not_stopped(kernel)?;
    let id = park(kernel)?;
    let now = kernel.lock().unwrap().clock.now();
    enqueue_reply(kernel, now + delay, id, Outcome::Value(unit()));
    block_on(kernel, id).map(|_| ())
}
