//! Entities: the objects whose methods become scheduled events.

use std::sync::{Arc, Mutex};

use slab::Slab;

use crate::controller::ControllerHandle;
use crate::error::Result;
use crate::value::{Args, Value};

/// A small non-negative integer identifying one method on an entity class.
/// Whether it blocks is a property the entity itself knows from its
/// `signature_for` table, not something the kernel tracks.
pub type EventId = u32;

/// Dense, ascending id assigned by the [`Registry`] at `register` time.
pub type EntityId = usize;

/// The dispatch ABI a user object must implement to be scheduled as an
/// entity. In the source system a bytecode-rewriting proxy layer generates
/// this from annotated methods; that transform is out of scope here; entities
/// implement the trait directly.
///
/// `Send` because a [`RealTimeController`](crate::controller::realtime::RealTimeController)
/// dispatches entities from its own driver thread; batch and stepping
/// controllers pay no real cost for the bound since they never leave the
/// thread that created them.
pub trait Entity: Send {
    /// Name used in spectrum and report output. Advisory, need not be unique.
    fn class_name(&self) -> &str;

    /// Human-readable signature for `event_id`, for diagnostics and reports.
    /// Entities that don't care about introspection may leave this default.
    fn signature_for(&self, _event_id: EventId) -> Option<&str> {
        None
    }

    /// Executes `event_id` with `args`, returning the value a blocking
    /// caller receives or an error that propagates via the reply path.
    fn invoke(&mut self, event_id: EventId, args: Args) -> Result<Value>;

    /// Called once at registration so the entity can retain a handle for
    /// posting its own events later. Default no-op for entities that only
    /// ever react to `invoke` and never initiate calls of their own.
    fn bind_to(&mut self, _controller: ControllerHandle) {}
}

/// Identity and liveness of every registered entity.
///
/// Entities live from `register` until the simulation ends. The registry
/// never removes one; the kernel does not destroy an entity it owns.
#[derive(Default)]
pub(crate) struct Registry {
    entities: Slab<(String, Arc<Mutex<dyn Entity>>)>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry {
            entities: Slab::new(),
        }
    }

    pub(crate) fn register(&mut self, entity: Arc<Mutex<dyn Entity>>) -> EntityId {
        let name = entity.lock().unwrap().class_name().to_string();
        self.entities.insert((name, entity))
    }

    pub(crate) fn lookup(&self, id: EntityId) -> Option<Arc<Mutex<dyn Entity>>> {
        self.entities.get(id).map(|(_, entity)| entity.clone())
    }

    pub(crate) fn class_name(&self, id: EntityId) -> Option<&str> {
        self.entities.get(id).map(|(name, _)| name.as_str())
    }

    pub(crate) fn all(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().map(|(id, _)| id)
    }
}
