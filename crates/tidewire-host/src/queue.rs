//! Bounded work queue between callers and the send loop.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tidewire_core::config::OverflowPolicy;

use crate::message::Message;

/// Work for the send loop.
#[derive(Debug)]
pub enum Work {
    /// Transmit a message.
    Send(Message),
    /// Wake the loop so it notices the transport is closing.
    Shutdown,
}

/// Bounded multi-producer queue that never blocks the producer.
///
/// When full, the overflow policy decides which item is dropped. The dropped item is handed
/// back to the caller so it can be counted.
#[derive(Debug)]
pub struct SendQueue {
    tx: Sender<Work>,
    rx: Receiver<Work>,
    policy: OverflowPolicy,
}

impl SendQueue {
    /// Creates a queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx, policy }
    }

    /// Enqueues `work`, returning whatever had to be dropped.
    pub fn push(&self, work: Work) -> Option<Work> {
        let work = match self.tx.try_send(work) {
            Ok(()) => return None,
            Err(TrySendError::Full(work)) | Err(TrySendError::Disconnected(work)) => work,
        };

        match self.policy {
            OverflowPolicy::DropNewest => Some(work),
            OverflowPolicy::DropOldest => {
                let oldest = self.rx.try_recv().ok();
                match self.tx.try_send(work) {
                    Ok(()) => oldest,
                    // Another producer refilled the slot; the new item loses.
                    Err(TrySendError::Full(work)) | Err(TrySendError::Disconnected(work)) => {
                        Some(work)
                    }
                }
            }
        }
    }

    /// Waits up to `timeout` for the next item.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Work, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Takes the next item without waiting.
    pub fn try_recv(&self) -> Option<Work> {
        self.rx.try_recv().ok()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tidewire_core::shared::SharedBytes;
    use tidewire_protocol::{ChannelKind, Operation, Target};

    use super::*;

    fn message(tag: u8) -> Work {
        Work::Send(Message::outbound(
            SharedBytes::from_vec(vec![tag]),
            ChannelKind::Unreliable,
            Target::All,
            0,
            Operation::Data,
        ))
    }

    fn tag(work: Work) -> u8 {
        match work {
            Work::Send(message) => message.payload[0],
            Work::Shutdown => u8::MAX,
        }
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let queue = SendQueue::new(2, OverflowPolicy::DropOldest);
        assert!(queue.push(message(1)).is_none());
        assert!(queue.push(message(2)).is_none());

        let dropped = queue.push(message(3)).map(tag);
        assert_eq!(dropped, Some(1));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_recv().map(tag), Some(2));
        assert_eq!(queue.try_recv().map(tag), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_newest_keeps_queue() {
        let queue = SendQueue::new(2, OverflowPolicy::DropNewest);
        queue.push(message(1));
        queue.push(message(2));

        let dropped = queue.push(message(3)).map(tag);
        assert_eq!(dropped, Some(3));
        assert_eq!(queue.try_recv().map(tag), Some(1));
        assert_eq!(queue.try_recv().map(tag), Some(2));
    }

    #[test]
    fn test_recv_timeout_on_empty() {
        let queue = SendQueue::new(4, OverflowPolicy::DropOldest);
        assert!(matches!(
            queue.recv_timeout(Duration::from_millis(5)),
            Err(RecvTimeoutError::Timeout)
        ));
        queue.push(Work::Shutdown);
        assert!(matches!(queue.recv_timeout(Duration::from_millis(5)), Ok(Work::Shutdown)));
    }
}
