//! Batch controller: runs an entire simulation to completion on one thread.

use super::{ControllerHandle, ControllerOptions, ControllerState};
use crate::dispatcher;

/// Dispatches events until the queue is empty or `end_simulation()` is
/// called. Virtual time advances freely between dispatches.
pub struct SimulationController {
    handle: ControllerHandle,
}

impl SimulationController {
    pub fn new(options: ControllerOptions) -> Self {
        SimulationController {
            handle: ControllerHandle::new(options),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Runs to completion. Idempotent: calling this again on an already
    /// `Stopped` controller is a no-op.
    pub fn run_until_empty(&self) -> crate::error::Result<()> {
        {
            let mut core = self.handle.0.lock().unwrap();
            if core.state == ControllerState::Stopped {
                return Ok(());
            }
            core.state = ControllerState::Running;
        }
        loop {
            if self.handle.state() == ControllerState::Stopped {
                break;
            }
            if !dispatcher::run_one(&self.handle.0)? {
                break;
            }
        }
        let mut core = self.handle.0.lock().unwrap();
        if core.state != ControllerState::Stopped {
            core.state = ControllerState::Stopped;
        }
        Ok(())
    }
}

/// Entry point for the `#[eventry::main]` attribute: builds a fresh
/// controller, hands it to `setup`, then runs to completion.
pub fn run<F, T>(setup: F) -> T
where
    F: FnOnce(ControllerHandle) -> T,
{
    let controller = SimulationController::new(ControllerOptions::default());
    let result = setup(controller.handle());
    let _ = controller.run_until_empty();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EventId};
    use crate::value::{pack, Args, Value};
    use std::sync::{Arc, Mutex};

    struct Echo;

    impl Entity for Echo {
        fn class_name(&self) -> &str {
            "Echo"
        }

        fn invoke(&mut self, _event_id: EventId, mut args: Args) -> crate::error::Result<Value> {
            Ok(args.pop().unwrap())
        }
    }

    #[test]
    fn run_until_empty_drains_the_queue() {
        let controller = SimulationController::new(ControllerOptions::default());
        let handle = controller.handle();
        let id = handle.register(Arc::new(Mutex::new(Echo)));
        handle.post(id, 0, vec![pack(42i32)]).unwrap();

        controller.run_until_empty().unwrap();

        assert_eq!(handle.total_events(), 1);
        assert_eq!(handle.state(), ControllerState::Stopped);
    }

    #[test]
    fn run_until_empty_is_idempotent() {
        let controller = SimulationController::new(ControllerOptions::default());
        controller.run_until_empty().unwrap();
        controller.run_until_empty().unwrap();
        assert_eq!(controller.handle().state(), ControllerState::Stopped);
    }

    #[test]
    fn posting_after_stop_is_illegal_state() {
        let controller = SimulationController::new(ControllerOptions::default());
        let handle = controller.handle();
        let id = handle.register(Arc::new(Mutex::new(Echo)));
        controller.run_until_empty().unwrap();
        let err = handle.post(id, 0, vec![pack(1i32)]).unwrap_err();
        assert_eq!(err, crate::error::Error::IllegalState);
    }

    #[test]
    fn echo_scenario_reports_one_event_at_time_zero() {
        let controller = SimulationController::new(ControllerOptions::default());
        let handle = controller.handle();
        let id = handle.register(Arc::new(Mutex::new(Echo)));
        handle.post(id, 0, vec![pack(42i32)]).unwrap();
        controller.run_until_empty().unwrap();

        let report = handle.report();
        assert_eq!(report.total_events, 1);
        assert_eq!(report.virtual_end, 0);
        assert_eq!(report.spectrum.len(), 1);
        assert_eq!(report.spectrum[0].count, 1);
    }
}
