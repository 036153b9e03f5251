//! Publishing facade: binds a queue handle and the autosync policy.

use crate::queue::{MessageId, Queue, QueueError};

/// Sends messages to every subscriber registered on the queue.
///
/// With `autosync`, every send forces a durable flush to disk before
/// returning; without it, flushing is left to the operating system and
/// batched commits stay cheap.
pub struct Publisher {
    queue: Queue,
    autosync: bool,
}

impl Publisher {
    pub fn new(queue: Queue, autosync: bool) -> Self {
        Self { queue, autosync }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn autosync(&self) -> bool {
        self.autosync
    }

    /// Publish one message to all registered subscribers.
    pub fn send(&self, msg: &[u8]) -> Result<MessageId, QueueError> {
        self.queue
            .put(msg, self.queue.subscriber_ids(), self.autosync)
    }

    /// Publish a batch.
    ///
    /// Without autosync the whole batch shares one commit; with autosync each
    /// message is committed and flushed on its own, so a crash loses at most
    /// the message in flight.
    pub fn send_many(&self, msgs: &[Vec<u8>]) -> Result<Vec<MessageId>, QueueError> {
        if self.autosync {
            msgs.iter()
                .map(|msg| self.queue.put(msg, self.queue.subscriber_ids(), true))
                .collect()
        } else {
            self.queue
                .put_many(msgs, self.queue.subscriber_ids(), false)
        }
    }
}
