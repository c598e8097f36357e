//! Hand-off of decoded command samples into the simulation.
//!
//! Uses a bounded crossbeam channel so packet-consume code can submit
//! without blocking, and the game loop drains everything pending at the
//! start of each tick. Nothing here waits: a full queue is backpressure,
//! not a stall.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::ClientId;
use crate::net::command::CommandSample;

/// One decoded command attributed to its client
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub client_id: ClientId,
    pub sample: CommandSample,
}

/// Bounded queue between packet consumption and the simulation tick
pub struct CommandQueue {
    sender: Sender<QueuedCommand>,
    receiver: Receiver<QueuedCommand>,
    capacity: usize,
}

impl CommandQueue {
    /// Capacity should cover a full tick's worth of burst input from every
    /// connected client.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// New sender handle for a connection's consume path
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Try to submit a command (non-blocking); false when the queue is full
    #[inline]
    pub fn try_submit(&self, client_id: ClientId, sample: CommandSample) -> bool {
        self.sender
            .try_send(QueuedCommand { client_id, sample })
            .is_ok()
    }

    /// Drain all pending commands for this tick
    pub fn drain(&self) -> Vec<QueuedCommand> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Clonable sender handle held by each connection
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<QueuedCommand>,
}

impl CommandSender {
    #[inline]
    pub fn try_send(
        &self,
        client_id: ClientId,
        sample: CommandSample,
    ) -> Result<(), CommandQueueError> {
        self.sender
            .try_send(QueuedCommand { client_id, sample })
            .map_err(|err| match err {
                TrySendError::Full(_) => CommandQueueError::Full,
                TrySendError::Disconnected(_) => CommandQueueError::Disconnected,
            })
    }
}

/// Command queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandQueueError {
    /// Queue is full (backpressure)
    Full,
    /// Queue disconnected (game loop stopped)
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample(msec: u8) -> CommandSample {
        CommandSample {
            msec,
            ..CommandSample::default()
        }
    }

    #[test]
    fn test_submit_and_drain() {
        let queue = CommandQueue::new(10);
        let client_id = Uuid::new_v4();

        assert!(queue.try_submit(client_id, sample(1)));
        assert!(queue.try_submit(client_id, sample(2)));
        assert_eq!(queue.pending_count(), 2);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].sample.msec, 1);
        assert_eq!(drained[1].sample.msec, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_backpressure() {
        let queue = CommandQueue::new(2);
        let client_id = Uuid::new_v4();

        assert!(queue.try_submit(client_id, sample(1)));
        assert!(queue.try_submit(client_id, sample(2)));
        assert!(!queue.try_submit(client_id, sample(3)));

        queue.drain();
        assert!(queue.try_submit(client_id, sample(3)));
    }

    #[test]
    fn test_sender_handles() {
        let queue = CommandQueue::new(10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let sender_a = queue.sender();
        let sender_b = queue.sender();
        assert!(sender_a.try_send(a, sample(1)).is_ok());
        assert!(sender_b.try_send(b, sample(2)).is_ok());

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].client_id, a);
        assert_eq!(drained[1].client_id, b);
    }

    #[test]
    fn test_sender_full_error() {
        let queue = CommandQueue::new(1);
        let sender = queue.sender();
        let client_id = Uuid::new_v4();

        assert!(sender.try_send(client_id, sample(1)).is_ok());
        assert_eq!(
            sender.try_send(client_id, sample(2)),
            Err(CommandQueueError::Full)
        );
    }
}
