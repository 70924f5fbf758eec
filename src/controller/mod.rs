//! The controller: owner of the clock, queue, registry, and continuation
//! table, in its three execution-mode flavors.

pub mod batch;
pub mod realtime;
pub mod stepping;

use std::sync::{Arc, Mutex};

use crate::continuation::ContinuationTable;
use crate::dispatcher;
use crate::entity::{Entity, EntityId, EventId, Registry};
use crate::error::Result;
use crate::event::EventHandle;
use crate::queue::EventQueue;
use crate::stats::{Report, Spectrum};
use crate::value::{Args, Value};

/// Shared behind an `Arc<Mutex<..>>` rather than a plain `Rc<RefCell<..>>`
/// because `RealTimeController` hands it to a dedicated driver thread while
/// the constructing thread keeps a handle of its own. Every access is
/// scoped to a single method call, mirroring the borrow-then-drop
/// discipline `uringy::sync::channel` uses around its `RefCell`, so the
/// lock is never held across a call into user code.
pub(crate) type Kernel = Arc<Mutex<ControllerCore>>;

/// `Idle -> Running -> (Paused | Stopped)`, shared by all three controller
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Tunables a controller is constructed with.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub name: String,
    /// Gates spectrum counter increments; default on.
    pub track_spectrum: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            name: String::new(),
            track_spectrum: true,
        }
    }
}

/// Shared state behind every [`ControllerHandle`]. Not exposed directly;
/// all access goes through the handle so locks stay scoped to a single
/// method call.
pub(crate) struct ControllerCore {
    pub(crate) name: String,
    pub(crate) clock: crate::clock::Clock,
    pub(crate) seq: crate::clock::SeqCounter,
    pub(crate) queue: EventQueue,
    pub(crate) registry: Registry,
    pub(crate) continuations: ContinuationTable,
    pub(crate) spectrum: Spectrum,
    pub(crate) state: ControllerState,
}

impl ControllerCore {
    pub(crate) fn new(options: ControllerOptions, start_ms: u64) -> Self {
        ControllerCore {
            name: options.name,
            clock: crate::clock::Clock::new(),
            seq: crate::clock::SeqCounter::new(),
            queue: EventQueue::new(),
            registry: Registry::new(),
            continuations: ContinuationTable::new(),
            spectrum: Spectrum::new(options.track_spectrum, start_ms),
            state: ControllerState::Idle,
        }
    }
}

fn wall_clock_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A cheap, cloneable reference to a controller. This is what entities hold
/// after `bind_to` and what user code drives a simulation through. The
/// registry-of-indices-plus-handle design sidesteps the cyclic reference an
/// entity holding its controller and the controller holding its entities
/// would otherwise need.
#[derive(Clone)]
pub struct ControllerHandle(pub(crate) Kernel);

impl ControllerHandle {
    pub(crate) fn new(options: ControllerOptions) -> Self {
        ControllerHandle(Arc::new(Mutex::new(ControllerCore::new(
            options,
            wall_clock_ms(),
        ))))
    }

    pub fn name(&self) -> String {
        self.0.lock().unwrap().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.0.lock().unwrap().name = name.into();
    }

    pub fn state(&self) -> ControllerState {
        self.0.lock().unwrap().state
    }

    /// Current virtual instant.
    pub fn now(&self) -> u64 {
        self.0.lock().unwrap().clock.now()
    }

    /// Registers `entity` and calls its `bind_to` with this handle.
    pub fn register(&self, entity: Arc<Mutex<dyn Entity>>) -> EntityId {
        let id = self.0.lock().unwrap().registry.register(entity.clone());
        entity.lock().unwrap().bind_to(self.clone());
        id
    }

    /// Non-blocking: enqueues `(target, event_id, args)` at `now`.
    pub fn post(&self, target: EntityId, event_id: EventId, args: Args) -> Result<EventHandle> {
        self.require_postable()?;
        let now = self.now();
        Ok(dispatcher::enqueue_invoke(&self.0, now, target, event_id, args, None))
    }

    /// Non-blocking: enqueues `(target, event_id, args)` at `now + delay`.
    pub fn post_after(
        &self,
        delay: u64,
        target: EntityId,
        event_id: EventId,
        args: Args,
    ) -> Result<EventHandle> {
        self.require_postable()?;
        let time = self.now() + delay;
        Ok(dispatcher::enqueue_invoke(&self.0, time, target, event_id, args, None))
    }

    /// Blocking: legal only from within a dispatched event. Suspends the
    /// caller until `target`'s reply is dispatched.
    pub fn post_continuing(&self, target: EntityId, event_id: EventId, args: Args) -> Result<Value> {
        dispatcher::post_continuing(&self.0, target, event_id, args)
    }

    /// Like [`post_continuing`](Self::post_continuing), but resolves with
    /// [`Error::Timeout`](crate::error::Error::Timeout) after `timeout`
    /// virtual-time units if no reply arrived first.
    pub fn post_continuing_timeout(
        &self,
        target: EntityId,
        event_id: EventId,
        args: Args,
        timeout: u64,
    ) -> Result<Value> {
        dispatcher::post_continuing_timeout(&self.0, target, event_id, args, timeout)
    }

    /// Parks the calling frame for `delay` virtual-time units.
    pub fn sleep(&self, delay: u64) -> Result<()> {
        dispatcher::sleep(&self.0, delay)
    }

    /// Cancels a previously posted event; a no-op if it already dispatched.
    pub fn cancel(&self, handle: &EventHandle) {
        handle.cancel();
    }

    /// Ends the simulation at the next opportunity the running controller
    /// checks for it.
    pub fn end_simulation(&self) {
        let mut core = self.0.lock().unwrap();
        if core.state != ControllerState::Stopped {
            core.state = ControllerState::Stopped;
        }
    }

    /// Cancels every pending event, resumes every parked continuation with
    /// `Cancelled`, and transitions to `Stopped`. Idempotent.
    pub fn close(&self) {
        {
            let mut core = self.0.lock().unwrap();
            if core.state == ControllerState::Stopped {
                return;
            }
            core.queue.drain().for_each(|event| event.handle.cancel());
            core.state = ControllerState::Stopped;
        }
        dispatcher::cancel_all(&self.0);
    }

    pub fn report(&self) -> Report {
        let mut core = self.0.lock().unwrap();
        let now_ms = wall_clock_ms();
        core.spectrum.touch_wall_clock_end(now_ms);
        core.spectrum.report(&core.name)
    }

    pub fn total_events(&self) -> u64 {
        self.0.lock().unwrap().spectrum.total_events()
    }

    /// The per-`(entity class, event id)` dispatch counters, without the
    /// rest of [`Report`].
    pub fn spectrum(&self) -> Vec<crate::stats::SpectrumEntry> {
        self.0.lock().unwrap().spectrum.entries()
    }

    /// Wall-clock instant (ms since epoch) of this controller's construction.
    pub fn simulation_start(&self) -> u64 {
        self.0.lock().unwrap().spectrum.simulation_start_ms()
    }

    /// Wall-clock instant (ms since epoch) as of the most recent [`Self::report`]
    /// call, or construction if `report` was never called.
    pub fn simulation_end(&self) -> u64 {
        self.0.lock().unwrap().spectrum.simulation_end_ms()
    }

    fn require_postable(&self) -> Result<()> {
        if self.0.lock().unwrap().state == ControllerState::Stopped {
            return Err(crate::error::Error::IllegalState);
        }
        Ok(())
    }
}
