//! Real-time controller: binds virtual time to wall-clock time.
//!
//! `post`/`post_after` must stay safe to call from threads other than the
//! dispatcher. The dispatcher itself, and every blocking call, only ever
//! runs on one dedicated driver thread, so external callers hand their
//! request to that thread over an `mpsc` channel instead of locking the
//! kernel directly from another thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::dispatcher;
use crate::entity::{EntityId, EventId};
use crate::value::Args;

use super::{ControllerHandle, ControllerOptions, ControllerState};

enum ExternalRequest {
    Post {
        target: EntityId,
        event_id: EventId,
        args: Args,
    },
    PostAfter {
        delay: u64,
        target: EntityId,
        event_id: EventId,
        args: Args,
    },
}

/// How virtual time maps to wall-clock time: `rate` virtual units per
/// `unit`. Defaults to 1 virtual unit = 1 millisecond.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    pub virtual_units: u64,
    pub wall_clock: Duration,
}

impl Default for Rate {
    fn default() -> Self {
        Rate {
            virtual_units: 1,
            wall_clock: Duration::from_millis(1),
        }
    }
}

impl Rate {
    fn due_instant(&self, origin: Instant, virtual_time: u64) -> Instant {
        if self.virtual_units == 0 {
            return origin;
        }
        let periods = virtual_time / self.virtual_units;
        origin + self.wall_clock * periods as u32
    }
}

enum DriverSignal {
    Running,
    Paused,
    Stopped,
}

/// Coordinates `pause`/`resume`/`stop` with the driver thread. The driver
/// checks in at the top of every loop iteration: `Paused` blocks it there
/// until `resume` or `stop`, `Stopped` ends the loop for good.
struct DriverControl {
    signal: Mutex<DriverSignal>,
    changed: Condvar,
}

impl DriverControl {
    fn new() -> Arc<Self> {
        Arc::new(DriverControl {
            signal: Mutex::new(DriverSignal::Running),
            changed: Condvar::new(),
        })
    }

    fn pause(&self) {
        let mut signal = self.signal.lock().unwrap();
        if matches!(*signal, DriverSignal::Running) {
            *signal = DriverSignal::Paused;
            self.changed.notify_one();
        }
    }

    fn resume(&self) {
        let mut signal = self.signal.lock().unwrap();
        if matches!(*signal, DriverSignal::Paused) {
            *signal = DriverSignal::Running;
            self.changed.notify_one();
        }
    }

    fn is_paused(&self) -> bool {
        matches!(*self.signal.lock().unwrap(), DriverSignal::Paused)
    }

    fn stop(&self) {
        let mut signal = self.signal.lock().unwrap();
        *signal = DriverSignal::Stopped;
        self.changed.notify_one();
    }

    /// Blocks while paused. Returns `true` to keep running, `false` once
    /// stopped.
    fn wait_if_paused(&self) -> bool {
        let mut signal = self.signal.lock().unwrap();
        loop {
            match &*signal {
                DriverSignal::Running => return true,
                DriverSignal::Stopped => return false,
                DriverSignal::Paused => signal = self.changed.wait(signal).unwrap(),
            }
        }
    }
}

/// Drives a controller on its own thread, sleeping between dispatches so
/// virtual time tracks wall-clock time.
pub struct RealTimeController {
    handle: ControllerHandle,
    rate: Rate,
    requests: Sender<ExternalRequest>,
    requests_rx: Option<Receiver<ExternalRequest>>,
    control: Arc<DriverControl>,
    driver: Option<JoinHandle<()>>,
}

impl RealTimeController {
    pub fn new(options: ControllerOptions, rate: Rate) -> Self {
        let (tx, rx) = mpsc::channel();
        RealTimeController {
            handle: ControllerHandle::new(options),
            rate,
            requests: tx,
            requests_rx: Some(rx),
            control: DriverControl::new(),
            driver: None,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// A cloneable handle usable from any thread to `post`/`post_after`
    /// into this controller while its driver thread is running.
    pub fn external(&self) -> ExternalHandle {
        ExternalHandle {
            requests: self.requests.clone(),
        }
    }

    /// Spawns the driver thread. Peeks the queue head, sleeps until its
    /// due wall-clock instant, then dispatches it; if dispatch has fallen
    /// behind, it catches up without sleeping.
    pub fn start(&mut self) {
        if !self.control.is_paused() {
            self.handle.0.lock().unwrap().state = ControllerState::Running;
        }
        let kernel = self.handle.0.clone();
        let rate = self.rate;
        let control = self.control.clone();
        let requests_rx = self
            .requests_rx
            .take()
            .expect("start() called twice on the same controller");

        self.driver = Some(thread::spawn(move || {
            let origin = Instant::now();
            loop {
                if !control.wait_if_paused() {
                    break;
                }
                while let Ok(request) = requests_rx.try_recv() {
                    apply_external(&kernel, request);
                }

                let peeked_time = kernel.lock().unwrap().queue.peek().map(|e| e.time);
                let Some(time) = peeked_time else {
                    // Idle: wait briefly for either external work or a stop
                    // request rather than busy-spinning.
                    thread::sleep(Duration::from_millis(1));
                    continue;
                };

                let due = rate.due_instant(origin, time);
                let now = Instant::now();
                if due > now {
                    trace!(?due, "driver sleeping until next event is due");
                    thread::sleep(due - now);
                    continue;
                }

                match dispatcher::run_one(&kernel) {
                    Ok(true) => {}
                    Ok(false) => thread::sleep(Duration::from_millis(1)),
                    Err(_) => break,
                }

                if kernel.lock().unwrap().state == ControllerState::Stopped {
                    break;
                }
            }
            kernel.lock().unwrap().state = ControllerState::Stopped;
        }));
    }

    /// Suspends the driver before its next loop iteration. The event it is
    /// currently dispatching, if any, still runs to completion first.
    pub fn pause(&mut self) {
        self.handle.0.lock().unwrap().state = ControllerState::Paused;
        self.control.pause();
    }

    /// Resumes a paused driver.
    pub fn resume(&mut self) {
        self.handle.0.lock().unwrap().state = ControllerState::Running;
        self.control.resume();
    }

    /// Requests the driver halt after the event it's currently processing
    /// (or immediately, if idle or paused). Blocks until the driver thread
    /// exits. The controller settles into `Stopped`, a terminal state with
    /// no `resume()` back out of it.
    pub fn stop(&mut self) {
        self.control.stop();
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
        self.handle.0.lock().unwrap().state = ControllerState::Stopped;
    }
}

impl Drop for RealTimeController {
    fn drop(&mut self) {
        if self.driver.is_some() {
            self.stop();
        }
    }
}

fn apply_external(kernel: &super::Kernel, request: ExternalRequest) {
    match request {
        ExternalRequest::Post {
            target,
            event_id,
            args,
        } => {
            let now = kernel.lock().unwrap().clock.now();
            dispatcher::enqueue_invoke(kernel, now, target, event_id, args, None);
        }
        ExternalRequest::PostAfter {
            delay,
            target,
            event_id,
            args,
        } => {
            let now = kernel.lock().unwrap().clock.now();
            dispatcher::enqueue_invoke(kernel, now + delay, target, event_id, args, None);
        }
    }
}

/// Safe to send to other threads; the only way to reach a running
/// [`RealTimeController`] from outside its driver thread.
#[derive(Clone)]
pub struct ExternalHandle {
    requests: Sender<ExternalRequest>,
}

impl ExternalHandle {
    pub fn post(&self, target: EntityId, event_id: EventId, args: Args) {
        let _ = self.requests.send(ExternalRequest::Post {
            target,
            event_id,
            args,
        });
    }

    pub fn post_after(&self, delay: u64, target: EntityId, event_id: EventId, args: Args) {
        let _ = self.requests.send(ExternalRequest::PostAfter {
            delay,
            target,
            event_id,
            args,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::value::{pack, Value};
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<i32>>>);

    impl Entity for Recorder {
        fn class_name(&self) -> &str {
            "Recorder"
        }

        fn invoke(&mut self, _event_id: EventId, mut args: Args) -> crate::error::Result<Value> {
            let v: i32 = crate::value::unpack(args.pop().unwrap());
            self.0.lock().unwrap().push(v);
            Ok(crate::value::unit())
        }
    }

    #[test]
    fn dispatches_queued_events_then_can_be_stopped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut controller = RealTimeController::new(
            ControllerOptions::default(),
            Rate {
                virtual_units: 1,
                wall_clock: Duration::from_millis(1),
            },
        );
        let handle = controller.handle();
        let id = handle.register(Arc::new(Mutex::new(Recorder(seen.clone()))));
        handle.post(id, 0, vec![pack(1i32)]).unwrap();

        controller.start();
        thread::sleep(Duration::from_millis(20));
        controller.stop();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn external_handle_posts_from_another_thread() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut controller = RealTimeController::new(
            ControllerOptions::default(),
            Rate {
                virtual_units: 1,
                wall_clock: Duration::from_millis(1),
            },
        );
        let handle = controller.handle();
        let id = handle.register(Arc::new(Mutex::new(Recorder(seen.clone()))));
        controller.start();

        let external = controller.external();
        let poster = thread::spawn(move || {
            external.post(id, 0, vec![pack(7i32)]);
        });
        poster.join().unwrap();
        thread::sleep(Duration::from_millis(20));
        controller.stop();

        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn pause_halts_dispatch_until_resume() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut controller = RealTimeController::new(
            ControllerOptions::default(),
            Rate {
                virtual_units: 1,
                wall_clock: Duration::from_millis(1),
            },
        );
        let handle = controller.handle();
        let id = handle.register(Arc::new(Mutex::new(Recorder(seen.clone()))));
        handle.post(id, 0, vec![pack(1i32)]).unwrap();

        // Paused before the driver ever starts, so the due event cannot
        // race ahead of the pause.
        controller.pause();
        controller.start();
        assert_eq!(handle.state(), ControllerState::Paused);
        thread::sleep(Duration::from_millis(20));
        assert!(seen.lock().unwrap().is_empty());

        controller.resume();
        assert_eq!(handle.state(), ControllerState::Running);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        controller.stop();
        assert_eq!(handle.state(), ControllerState::Stopped);
    }
}
