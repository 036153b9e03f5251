//! Control plane: one-time initialization of a queue directory and
//! subscriber administration.
//!
//! A queue is two-phase: uninitialized until `init` writes all five
//! configuration keys, initialized forever after. Opening an uninitialized
//! queue fails, so every admin flow starts here.

use std::fs;
use std::path::Path;

use heed::types::{Bytes, Str, Unit};
use heed::Database;

use crate::queue::error::QueueError;
use crate::queue::model::{
    HighWaterMark, Strategy, SubscriberId, DATA_DB, HWM_DB_SIZE_BYTES_KEY, MAX_MSGS_NUM_KEY,
    META_DB, MSG_TIMEOUT_SECS_KEY, PENDING_DB, QUEUE_DB, STRATEGY_KEY, SUBSCRIBER_IDS_KEY,
};
use crate::queue::Queue;
use crate::store::{Store, StoreError, DEFAULT_MAX_DBS};

type ConfigDb = Database<Str, Str>;

/// Administers one queue directory: creation, subscriber registry,
/// maintenance.
pub struct Control {
    queue: Queue,
}

impl Control {
    /// Initialize the queue at `path`, creating the directory if needed and
    /// opening the environment with the given limits.
    ///
    /// On a fresh directory this creates the built-in databases, one inbox
    /// per subscriber and writes the full configuration. On an already
    /// initialized queue the stored configuration wins and the arguments are
    /// ignored.
    pub fn init(
        path: impl AsRef<Path>,
        subscriber_ids: &[SubscriberId],
        max_readers: u32,
        map_size: usize,
        hwm: HighWaterMark,
        strategy: Strategy,
    ) -> Result<Self, QueueError> {
        let path = path.as_ref();
        fs::create_dir_all(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Store::open(path, max_readers, DEFAULT_MAX_DBS, map_size)?;
        Self::init_on(store, subscriber_ids, hwm, strategy)
    }

    /// Initialize on an environment that is already open, e.g. the one shared
    /// by an [`Environment`](crate::Environment).
    pub(crate) fn init_on(
        store: Store,
        subscriber_ids: &[SubscriberId],
        hwm: HighWaterMark,
        strategy: Strategy,
    ) -> Result<Self, QueueError> {
        if is_initialized(&store)? {
            tracing::debug!(path = ?store.path(), "queue already initialized, reloading");
            let queue = Queue::with_store(store)?;
            return Ok(Self { queue });
        }

        let mut wtxn = store.write_txn()?;
        store.create_db::<Str, Bytes>(&mut wtxn, DATA_DB)?;
        store.create_db::<Str, Str>(&mut wtxn, META_DB)?;
        store.create_db::<Str, Str>(&mut wtxn, PENDING_DB)?;
        let config = store.create_db::<Str, Str>(&mut wtxn, QUEUE_DB)?;
        for sub in subscriber_ids {
            store.create_db::<Str, Unit>(&mut wtxn, sub.as_str())?;
        }

        config.put(
            &mut wtxn,
            HWM_DB_SIZE_BYTES_KEY,
            &hwm.hwm_db_size_bytes.to_string(),
        )?;
        config.put(&mut wtxn, MAX_MSGS_NUM_KEY, &hwm.max_msgs_num.to_string())?;
        config.put(
            &mut wtxn,
            MSG_TIMEOUT_SECS_KEY,
            &hwm.msg_timeout_secs.to_string(),
        )?;
        config.put(&mut wtxn, STRATEGY_KEY, strategy.as_str())?;
        config.put(&mut wtxn, SUBSCRIBER_IDS_KEY, &join_ids(subscriber_ids))?;
        wtxn.commit()?;

        tracing::debug!(
            path = ?store.path(),
            subscribers = subscriber_ids.len(),
            "initialized queue"
        );
        let queue = Queue::with_store(store)?;
        Ok(Self { queue })
    }

    /// True iff all five configuration keys are present.
    pub fn check_initialized(&self) -> Result<bool, QueueError> {
        is_initialized(self.queue.store())
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn into_queue(self) -> Queue {
        self.queue
    }

    pub fn subscriber_ids(&self) -> &[SubscriberId] {
        self.queue.subscriber_ids()
    }

    /// Register a subscriber: create its inbox and add it to the registry.
    /// Registering an existing subscriber is a no-op.
    pub fn add_subscriber(&mut self, sub_id: &SubscriberId) -> Result<(), QueueError> {
        let store = self.queue.store().clone();
        let mut wtxn = store.write_txn()?;
        store.create_db::<Str, Unit>(&mut wtxn, sub_id.as_str())?;
        let config = store.create_db::<Str, Str>(&mut wtxn, QUEUE_DB)?;

        let mut ids = read_ids(config, &wtxn)?;
        if !ids.iter().any(|id| id == sub_id.as_str()) {
            ids.push(sub_id.to_string());
        }
        config.put(&mut wtxn, SUBSCRIBER_IDS_KEY, &ids.join(" "))?;
        wtxn.commit()?;

        self.reload()
    }

    /// Unregister a subscriber: empty its inbox (decrementing the pending
    /// count of every message that sat in it), drop it from the registry and
    /// reap whatever the decrements made dangling. Removing an unknown
    /// subscriber only touches the registry.
    pub fn remove_subscriber(&mut self, sub_id: &SubscriberId) -> Result<(), QueueError> {
        let store = self.queue.store().clone();
        let mut wtxn = store.write_txn()?;

        if let Some(inbox) = store.open_db::<Str, Unit>(&wtxn, sub_id.as_str())? {
            let keys: Vec<String> = inbox
                .iter(&wtxn)?
                .map(|entry| entry.map(|(key, ())| key.to_string()))
                .collect::<Result<_, heed::Error>>()?;
            inbox.clear(&mut wtxn)?;
            for key in &keys {
                self.queue.decrement_pending(&mut wtxn, key)?;
            }
        }

        let config = store.create_db::<Str, Str>(&mut wtxn, QUEUE_DB)?;
        let ids: Vec<String> = read_ids(config, &wtxn)?
            .into_iter()
            .filter(|id| id != sub_id.as_str())
            .collect();
        config.put(&mut wtxn, SUBSCRIBER_IDS_KEY, &ids.join(" "))?;
        wtxn.commit()?;

        self.reload()?;
        self.queue.prune_dangling()
    }

    /// Empty one subscriber's inbox, decrementing the pending count of every
    /// message in it. The subscriber stays registered.
    pub fn prune_all_messages_for(&self, sub_id: &SubscriberId) -> Result<(), QueueError> {
        let store = self.queue.store().clone();
        let mut wtxn = store.write_txn()?;
        let inbox = self.queue.inbox(&wtxn, sub_id.as_str())?;

        let keys: Vec<String> = inbox
            .iter(&wtxn)?
            .map(|entry| entry.map(|(key, ())| key.to_string()))
            .collect::<Result<_, heed::Error>>()?;
        inbox.clear(&mut wtxn)?;
        for key in &keys {
            self.queue.decrement_pending(&mut wtxn, key)?;
        }
        wtxn.commit()?;
        Ok(())
    }

    /// Empty every inbox, then reap. Draining all inboxes drives every
    /// pending count to zero, so the prune cascades into full data cleanup.
    pub fn clear_all_subscribers(&self) -> Result<(), QueueError> {
        for sub in self.queue.subscriber_ids().to_vec() {
            self.prune_all_messages_for(&sub)?;
        }
        self.queue.prune_dangling()
    }

    /// Reap all dangling messages now instead of waiting for the next
    /// publish.
    pub fn prune_dangling(&self) -> Result<(), QueueError> {
        self.queue.prune_dangling()
    }

    fn reload(&mut self) -> Result<(), QueueError> {
        self.queue = Queue::with_store(self.queue.store().clone())?;
        Ok(())
    }
}

fn is_initialized(store: &Store) -> Result<bool, QueueError> {
    let rtxn = store.read_txn()?;
    let Some(config) = store.open_db::<Str, Str>(&rtxn, QUEUE_DB)? else {
        return Ok(false);
    };
    for key in [
        HWM_DB_SIZE_BYTES_KEY,
        MAX_MSGS_NUM_KEY,
        MSG_TIMEOUT_SECS_KEY,
        STRATEGY_KEY,
        SUBSCRIBER_IDS_KEY,
    ] {
        if config.get(&rtxn, key)?.is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn read_ids(config: ConfigDb, rtxn: &heed::RoTxn<'_>) -> Result<Vec<String>, QueueError> {
    Ok(config
        .get(rtxn, SUBSCRIBER_IDS_KEY)?
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default())
}

fn join_ids(ids: &[SubscriberId]) -> String {
    ids.iter()
        .map(SubscriberId::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}
