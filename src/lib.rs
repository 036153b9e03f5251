//! Persistent multi-subscriber message queue in a directory.
//!
//! One queue lives in one directory, backed by a memory-mapped LMDB
//! environment, and is shared by any number of publisher and subscriber
//! processes on the same host. Every published message is delivered
//! independently to every registered subscriber; each subscriber drains its
//! own inbox at its own pace. The queue is bounded in message count and byte
//! size and enforces both bounds by pruning on publish.
//!
//! ```no_run
//! use maildrop::{Environment, HighWaterMark, Strategy, SubscriberId};
//!
//! # fn main() -> Result<(), maildrop::Error> {
//! let env = Environment::new("/var/queues/orders")?;
//! let control = env.new_control(
//!     &[SubscriberId::new("billing")?],
//!     HighWaterMark::default(),
//!     Strategy::PruneFirst,
//! )?;
//! drop(control);
//!
//! let publisher = env.new_publisher(false)?;
//! publisher.send(b"order #4711")?;
//!
//! let billing = env.new_subscriber("billing")?;
//! assert_eq!(billing.receive(60, 10)?.as_deref(), Some(&b"order #4711"[..]));
//! # Ok(())
//! # }
//! ```

pub mod control;
pub mod environment;
pub mod error;
pub mod fsutil;
pub mod publisher;
pub mod queue;
pub mod store;
pub mod subscriber;

pub use control::Control;
pub use environment::Environment;
pub use error::Error;
pub use publisher::Publisher;
pub use queue::{
    parse_strategy, HighWaterMark, MessageId, Queue, QueueData, QueueError, Strategy, SubscriberId,
};
pub use store::{Store, StoreError};
pub use subscriber::Subscriber;

pub type Result<T> = std::result::Result<T, Error>;
