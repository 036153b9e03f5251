//! Factory facade: one shared environment producing controls, publishers and
//! subscribers for a single queue directory.

use std::path::{Path, PathBuf};

use crate::control::Control;
use crate::publisher::Publisher;
use crate::queue::{HighWaterMark, Queue, QueueError, Strategy, SubscriberId};
use crate::store::{Store, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS};
use crate::subscriber::Subscriber;

/// Entry point for a queue directory.
///
/// All components built from one `Environment` share a single LMDB
/// environment handle, which is what LMDB expects within a process. The
/// directory must already exist; creating it is the control plane's job.
pub struct Environment {
    path: PathBuf,
    store: Store,
}

impl Environment {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let store = Store::open(&path, DEFAULT_MAX_READERS, DEFAULT_MAX_DBS, DEFAULT_MAP_SIZE)?;
        Ok(Self { path, store })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize (or reload) the queue and return its control handle.
    pub fn new_control(
        &self,
        subscriber_ids: &[SubscriberId],
        hwm: HighWaterMark,
        strategy: Strategy,
    ) -> Result<Control, QueueError> {
        Control::init_on(self.store.clone(), subscriber_ids, hwm, strategy)
    }

    /// A publisher sending to every registered subscriber.
    pub fn new_publisher(&self, autosync: bool) -> Result<Publisher, QueueError> {
        let queue = Queue::with_store(self.store.clone())?;
        Ok(Publisher::new(queue, autosync))
    }

    /// A subscriber bound to the inbox named `id`.
    pub fn new_subscriber(&self, id: impl Into<String>) -> Result<Subscriber, QueueError> {
        let id = SubscriberId::new(id)?;
        let queue = Queue::with_store(self.store.clone())?;
        Ok(Subscriber::new(id, queue))
    }
}
