//! Stepping controller: dispatches one event at a time for deterministic
//! debugging.

use super::{ControllerHandle, ControllerOptions, ControllerState};
use crate::dispatcher;
use crate::error::Result;

pub struct SteppingController {
    handle: ControllerHandle,
}

impl SteppingController {
    pub fn new(options: ControllerOptions) -> Self {
        SteppingController {
            handle: ControllerHandle::new(options),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Dispatches exactly one event from the head of the queue, if any.
    /// Returns `false` when the queue was empty.
    pub fn step(&self) -> Result<bool> {
        if self.handle.state() == ControllerState::Stopped {
            return Ok(false);
        }
        {
            let mut core = self.handle.0.lock().unwrap();
            if core.state == ControllerState::Idle {
                core.state = ControllerState::Running;
            }
        }
        dispatcher::run_one(&self.handle.0)
    }

    /// Steps until the head of the queue is at or past `time`, or the queue
    /// empties.
    pub fn step_until(&self, time: u64) -> Result<()> {
        loop {
            let due = {
                let core = self.handle.0.lock().unwrap();
                match core.queue.peek() {
                    Some(event) => event.time < time,
                    None => false,
                }
            };
            if !due {
                break;
            }
            if !self.step()? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EventId};
    use crate::value::{pack, Args, Value};
    use std::sync::{Arc, Mutex};

    struct Noop;

    impl Entity for Noop {
        fn class_name(&self) -> &str {
            "Noop"
        }

        fn invoke(&mut self, _event_id: EventId, _args: Args) -> crate::error::Result<Value> {
            Ok(crate::value::unit())
        }
    }

    #[test]
    fn step_dispatches_one_event_and_then_reports_empty() {
        let controller = SteppingController::new(ControllerOptions::default());
        let handle = controller.handle();
        let id = handle.register(Arc::new(Mutex::new(Noop)));
        handle.post(id, 0, vec![]).unwrap();
        handle.post(id, 0, vec![]).unwrap();

        assert!(controller.step().unwrap());
        assert_eq!(handle.total_events(), 1);
        assert!(controller.step().unwrap());
        assert_eq!(handle.total_events(), 2);
        assert!(!controller.step().unwrap());
    }

    #[test]
    fn step_until_stops_at_the_requested_time() {
        let controller = SteppingController::new(ControllerOptions::default());
        let handle = controller.handle();
        let id = handle.register(Arc::new(Mutex::new(Noop)));
        handle.post_after(5, id, 0, vec![pack(1i32)]).unwrap();
        handle.post_after(10, id, 0, vec![pack(2i32)]).unwrap();

        controller.step_until(10).unwrap();

        assert_eq!(handle.total_events(), 1);
        assert_eq!(handle.now(), 5);
    }
}
