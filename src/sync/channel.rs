//! Rendezvous channel for inter-entity communication under virtual time.
//!
//! Generalizes `uringy::sync::channel`'s always-buffered MPMC queue (a send
//! there never blocks, it just pushes onto an unbounded `VecDeque`) into the
//! spec's strict rendezvous discipline: at most one side's backlog is ever
//! non-empty. A send with a receiver already waiting resolves both sides
//! immediately at the current instant; otherwise the sender parks via the
//! same continuation machinery a blocking call uses, symmetric for receive.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::continuation::{ContinuationId, Outcome};
use crate::controller::ControllerHandle;
use crate::dispatcher;
use crate::error::{Error, Result};
use crate::value::{pack, unpack};

enum Backlog<T> {
    Empty,
    Senders(VecDeque<(ContinuationId, T)>),
    Receivers(VecDeque<ContinuationId>),
}

impl<T> Default for Backlog<T> {
    fn default() -> Self {
        Backlog::Empty
    }
}

struct State<T> {
    backlog: Backlog<T>,
    closed: bool,
}

/// Resets a drained backlog to `Empty` so the next `send`/`receive` can
/// freely transition it to the other side.
fn normalize<T>(backlog: &mut Backlog<T>) {
    let is_empty = match backlog {
        Backlog::Senders(senders) => senders.is_empty(),
        Backlog::Receivers(receivers) => receivers.is_empty(),
        Backlog::Empty => false,
    };
    if is_empty {
        *backlog = Backlog::Empty;
    }
}

/// A FIFO rendezvous point between entities. `send` and `receive` each
/// suspend the calling entity's frame until a counterpart arrives, so both
/// are legal only from within a dispatched event, same as any other blocking
/// call.
pub struct Channel<T> {
    controller: ControllerHandle,
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            controller: self.controller.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Send + 'static> Channel<T> {
    pub fn new(controller: &ControllerHandle) -> Self {
        Channel {
            controller: controller.clone(),
            state: Arc::new(Mutex::new(State {
                backlog: Backlog::Empty,
                closed: false,
            })),
        }
    }

    /// Delivers `v` to a waiting receiver immediately, or parks the caller
    /// until one arrives.
    pub fn send(&self, v: T) -> Result<()> {
        let waiting_receiver = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(Error::ChannelClosed);
            }
            let popped = match &mut state.backlog {
                Backlog::Receivers(receivers) => receivers.pop_front(),
                _ => None,
            };
            normalize(&mut state.backlog);
            popped
        };

        if let Some(receiver) = waiting_receiver {
            dispatcher::settle_now(&self.controller.0, receiver, Outcome::Value(pack(v)));
            return Ok(());
        }

        let id = dispatcher::park(&self.controller.0)?;
        {
            let mut state = self.state.lock().unwrap();
            match &mut state.backlog {
                Backlog::Senders(senders) => senders.push_back((id, v)),
                backlog @ Backlog::Empty => {
                    let mut senders = VecDeque::new();
                    senders.push_back((id, v));
                    *backlog = Backlog::Senders(senders);
                }
                Backlog::Receivers(_) => {
                    unreachable!("a receiver just arrived and was matched above")
                }
            }
        }
        dispatcher::block_on(&self.controller.0, id).map(|_| ())
    }

    /// Takes a value from a waiting sender immediately, or parks the caller
    /// until one arrives.
    pub fn receive(&self) -> Result<T> {
        let waiting_sender = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(Error::ChannelClosed);
            }
            let popped = match &mut state.backlog {
                Backlog::Senders(senders) => senders.pop_front(),
                _ => None,
            };
            normalize(&mut state.backlog);
            popped
        };

        if let Some((sender, v)) = waiting_sender {
            dispatcher::settle_now(&self.controller.0, sender, Outcome::Value(pack(())));
            return Ok(v);
        }

        let id = dispatcher::park(&self.controller.0)?;
        {
            let mut state = self.state.lock().unwrap();
            match &mut state.backlog {
                Backlog::Receivers(receivers) => receivers.push_back(id),
                backlog @ Backlog::Empty => {
                    let mut receivers = VecDeque::new();
                    receivers.push_back(id);
                    *backlog = Backlog::Receivers(receivers);
                }
                Backlog::Senders(_) => {
                    unreachable!("a sender just arrived and was matched above")
                }
            }
        }
        let value = dispatcher::block_on(&self.controller.0, id)?;
        Ok(unpack(value))
    }

    /// Resumes every parked sender and receiver with `ChannelClosed`, in
    /// FIFO order, at the current instant. Idempotent.
    pub fn close(&self) {
        let parked: Vec<ContinuationId> = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            match std::mem::take(&mut state.backlog) {
                Backlog::Empty => Vec::new(),
                Backlog::Senders(senders) => senders.into_iter().map(|(id, _)| id).collect(),
                Backlog::Receivers(receivers) => receivers.into_iter().collect(),
            }
        };
        for id in parked {
            dispatcher::settle_now(&self.controller.0, id, Outcome::Error(Error::ChannelClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::batch::SimulationController;
    use crate::controller::ControllerOptions;
    use crate::entity::{Entity, EventId};
    use crate::value::Args;
    use std::sync::{Arc, Mutex};

    struct Sender3 {
        channel: Channel<i32>,
    }

    impl Entity for Sender3 {
        fn class_name(&self) -> &str {
            "Sender3"
        }

        fn invoke(&mut self, _event_id: EventId, _args: Args) -> Result<crate::value::Value> {
            self.channel.send(1)?;
            self.channel.send(2)?;
            self.channel.send(3)?;
            Ok(crate::value::unit())
        }
    }

    struct Receiver3 {
        channel: Channel<i32>,
        seen: Arc<Mutex<Vec<i32>>>,
    }

    impl Entity for Receiver3 {
        fn class_name(&self) -> &str {
            "Receiver3"
        }

        fn invoke(&mut self, _event_id: EventId, _args: Args) -> Result<crate::value::Value> {
            for _ in 0..3 {
                let v = self.channel.receive()?;
                self.seen.lock().unwrap().push(v);
            }
            Ok(crate::value::unit())
        }
    }

    #[test]
    fn rendezvous_delivers_in_send_order_when_receiver_waits_first() {
        let controller = SimulationController::new(ControllerOptions::default());
        let handle = controller.handle();
        let channel = Channel::new(&handle);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let receiver_id = handle.register(Arc::new(Mutex::new(Receiver3 {
            channel: channel.clone(),
            seen: seen.clone(),
        })));
        let sender_id = handle.register(Arc::new(Mutex::new(Sender3 { channel })));

        handle.post(receiver_id, 0, vec![]).unwrap();
        handle.post(sender_id, 0, vec![]).unwrap();
        controller.run_until_empty().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(handle.now(), 0);
    }

    #[test]
    fn rendezvous_delivers_in_send_order_when_sender_runs_first() {
        let controller = SimulationController::new(ControllerOptions::default());
        let handle = controller.handle();
        let channel = Channel::new(&handle);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sender_id = handle.register(Arc::new(Mutex::new(Sender3 {
            channel: channel.clone(),
        })));
        let receiver_id = handle.register(Arc::new(Mutex::new(Receiver3 { channel, seen: seen.clone() })));

        handle.post(sender_id, 0, vec![]).unwrap();
        handle.post(receiver_id, 0, vec![]).unwrap();
        controller.run_until_empty().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    struct CloseWaiter {
        channel: Channel<i32>,
        result: Arc<Mutex<Option<Result<i32>>>>,
    }

    impl Entity for CloseWaiter {
        fn class_name(&self) -> &str {
            "CloseWaiter"
        }

        fn invoke(&mut self, _event_id: EventId, _args: Args) -> Result<crate::value::Value> {
            let outcome = self.channel.receive();
            *self.result.lock().unwrap() = Some(outcome);
            Ok(crate::value::unit())
        }
    }

    struct Closer {
        channel: Channel<i32>,
    }

    impl Entity for Closer {
        fn class_name(&self) -> &str {
            "Closer"
        }

        fn invoke(&mut self, _event_id: EventId, _args: Args) -> Result<crate::value::Value> {
            self.channel.close();
            Ok(crate::value::unit())
        }
    }

    #[test]
    fn close_resumes_parked_waiters_with_channel_closed() {
        let controller = SimulationController::new(ControllerOptions::default());
        let handle = controller.handle();
        let channel = Channel::new(&handle);
        let result = Arc::new(Mutex::new(None));

        let waiter_id = handle.register(Arc::new(Mutex::new(CloseWaiter {
            channel: channel.clone(),
            result: result.clone(),
        })));
        let closer_id = handle.register(Arc::new(Mutex::new(Closer { channel })));

        handle.post(waiter_id, 0, vec![]).unwrap();
        handle.post(closer_id, 0, vec![]).unwrap();
        controller.run_until_empty().unwrap();

        assert_eq!(result.lock().unwrap().take(), Some(Err(Error::ChannelClosed)));
    }
}
