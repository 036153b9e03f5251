//! Receiving facade: binds a queue handle and one subscriber identity.

use std::thread;
use std::time::Duration;

use crate::queue::model::now_secs;
use crate::queue::{Queue, QueueError, SubscriberId};

/// Receives messages from one subscriber inbox.
///
/// Consumption is at-least-once: a message is acknowledged (popped) the
/// moment `receive` returns it, and the payload handed to the caller is a
/// private copy.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    queue: Queue,
}

impl Subscriber {
    pub fn new(id: SubscriberId, queue: Queue) -> Self {
        Self { id, queue }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Wait up to `timeout_secs` for a message, polling `retries` times.
    ///
    /// On a hit the message is popped from this inbox only and its payload
    /// returned. When the deadline passes without a message, returns
    /// `Ok(None)`; the timeout is not an error.
    pub fn receive(
        &self,
        timeout_secs: u64,
        retries: u32,
    ) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = now_secs() + timeout_secs;
        let pause = poll_pause(timeout_secs, retries);
        loop {
            if let Some((msg_id, payload)) = self.queue.front(&self.id)? {
                self.queue.pop_message(&self.id, &msg_id)?;
                return Ok(Some(payload));
            }
            if now_secs() > deadline {
                return Ok(None);
            }
            thread::sleep(pause);
        }
    }

    /// Skip ahead: pop everything but the most recent pending message, then
    /// wait for and return that one.
    ///
    /// For a subscriber that only cares about the latest state. Other
    /// subscribers' inboxes are untouched; to keep only the latest message
    /// for everyone, configure the queue with `max_msgs_num = 1` instead.
    pub fn receive_to_top(
        &self,
        timeout_secs: u64,
        retries: u32,
    ) -> Result<Option<Vec<u8>>, QueueError> {
        let backlog = self.queue.inbox_len(&self.id)?;
        for _ in 1..backlog {
            self.queue.pop(&self.id)?;
        }
        self.receive(timeout_secs, retries)
    }
}

fn poll_pause(timeout_secs: u64, retries: u32) -> Duration {
    Duration::from_secs_f64(timeout_secs as f64 / f64::from(retries.max(1)))
}
