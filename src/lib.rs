//! A discrete-event simulation kernel in the SIMULA process-interaction
//! tradition: entities are scheduled as events on a virtual clock, and
//! blocking calls between entities suspend the caller until its reply is
//! dispatched, letting arbitrary virtual time pass and arbitrary other
//! entities run in between.
//!
//! The pieces, roughly leaf to root:
//!
//! - [`clock`] / [`event`] / [`queue`]: the virtual clock and the
//!   `(time, seq)`-ordered priority queue of scheduled events.
//! - [`entity`]: the `Entity` trait user objects implement to be scheduled,
//!   and the registry that tracks them.
//! - [`continuation`] / [`dispatcher`]: parks a blocking caller and resumes
//!   it when its reply is dispatched.
//! - [`controller`]: the scheduler that owns all of the above, in batch,
//!   stepping, and real-time flavors.
//! - [`sync`]: channels for inter-entity rendezvous under virtual time.
//! - [`stats`]: the spectrum/report instrumentation.
//! - [`error`] / [`value`]: the crate's error type and the dynamically-typed
//!   argument/return value used at the dispatch boundary.
//!
//! ```
//! use eventry::controller::batch::SimulationController;
//! use eventry::controller::ControllerOptions;
//! use eventry::entity::{Entity, EventId};
//! use eventry::error::Result;
//! use eventry::value::{pack, unpack, Args, Value};
//! use std::sync::{Arc, Mutex};
//!
//! struct Echo;
//!
//! impl Entity for Echo {
//!     fn class_name(&self) -> &str {
//!         "Echo"
//!     }
//!
//!     fn invoke(&mut self, _event_id: EventId, mut args: Args) -> Result<Value> {
//!         Ok(args.pop().unwrap())
//!     }
//! }
//!
//! let controller = SimulationController::new(ControllerOptions::default());
//! let handle = controller.handle();
//! let id = handle.register(Arc::new(Mutex::new(Echo)));
//! handle.post(id, 0, vec![pack(42i32)]).unwrap();
//! controller.run_until_empty().unwrap();
//! assert_eq!(handle.total_events(), 1);
//! ```

#[cfg(feature = "macros")]
pub use eventry_macros::main;

mod clock;
mod continuation;
pub mod controller;
mod dispatcher;
pub mod entity;
pub mod error;
mod event;
mod queue;
pub mod stats;
pub mod sync;
pub mod value;

pub use controller::batch::SimulationController;
pub use controller::realtime::RealTimeController;
pub use controller::stepping::SteppingController;
pub use controller::{ControllerHandle, ControllerOptions};
pub use entity::Entity;
pub use error::{Error, Result};
pub use event::EventHandle;
pub use stats::Report;
