//! Queue engine: the transactional protocols for publish, peek, acknowledge
//! and pruning.
//!
//! Every state transition is one LMDB commit; there are no multi-commit
//! protocols, so a crash resumes from the last committed state. Messages are
//! reference-counted across subscribers through `pending_db` and reaped
//! lazily: `pop` only decrements, cleanup happens in [`Queue::vacuum`], which
//! every publish runs first.

use std::collections::BTreeSet;
use std::path::Path;

use heed::types::{Bytes, Str, Unit};
use heed::{Database, RoTxn, RwTxn};

use crate::store::{
    Store, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS,
};

use super::error::QueueError;
use super::model::{
    now_secs, parse_strategy, HighWaterMark, MessageId, QueueData, Strategy, SubscriberId,
    DATA_DB, HWM_DB_SIZE_BYTES_KEY, MAX_MSGS_NUM_KEY, META_DB, MSG_TIMEOUT_SECS_KEY, PENDING_DB,
    QUEUE_DB, STRATEGY_KEY, SUBSCRIBER_IDS_KEY,
};

type DataDb = Database<Str, Bytes>;
type TextDb = Database<Str, Str>;
type InboxDb = Database<Str, Unit>;

/// A persistent multi-subscriber message queue living in one directory.
///
/// Handles are cheap to clone and share one environment; LMDB serializes
/// writers, so any number of handles (and processes) may operate on the same
/// directory concurrently.
#[derive(Clone, Debug)]
pub struct Queue {
    store: Store,
    data_db: DataDb,
    meta_db: TextDb,
    pending_db: TextDb,
    hwm: HighWaterMark,
    strategy: Strategy,
    subscriber_ids: Vec<SubscriberId>,
}

impl Queue {
    /// Open the queue at `dir` with the default environment limits.
    ///
    /// Fails with [`QueueError::NotInitialized`] unless the control plane has
    /// written the full configuration.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, QueueError> {
        let store = Store::open(
            dir.as_ref(),
            DEFAULT_MAX_READERS,
            DEFAULT_MAX_DBS,
            DEFAULT_MAP_SIZE,
        )?;
        Self::with_store(store)
    }

    /// Open the queue on an already-open environment, e.g. one shared with
    /// other facades through [`Environment`](crate::Environment).
    pub fn with_store(store: Store) -> Result<Self, QueueError> {
        let mut wtxn = store.write_txn()?;
        let data_db = store.create_db::<Str, Bytes>(&mut wtxn, DATA_DB)?;
        let meta_db = store.create_db::<Str, Str>(&mut wtxn, META_DB)?;
        let pending_db = store.create_db::<Str, Str>(&mut wtxn, PENDING_DB)?;
        let queue_db = store.create_db::<Str, Str>(&mut wtxn, QUEUE_DB)?;
        wtxn.commit()?;

        let data = read_queue_data(&store, queue_db)?;
        Ok(Self {
            store,
            data_db,
            meta_db,
            pending_db,
            hwm: data.hwm,
            strategy: data.strategy,
            subscriber_ids: data.subscriber_ids,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn hwm(&self) -> HighWaterMark {
        self.hwm
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Subscribers registered at the time this handle was opened.
    pub fn subscriber_ids(&self) -> &[SubscriberId] {
        &self.subscriber_ids
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Publish one message to the given subscribers.
    ///
    /// Runs [`Queue::vacuum`] first (in its own transactions), then writes
    /// the payload, timestamp, pending count and one inbox row per subscriber
    /// in a single commit. With `sync`, the commit is flushed durably before
    /// returning.
    ///
    /// Every subscriber must already be registered; an id outside the
    /// registry (or without an inbox database) fails with
    /// [`QueueError::UnknownSubscriber`].
    pub fn put(
        &self,
        payload: &[u8],
        subscribers: &[SubscriberId],
        sync: bool,
    ) -> Result<MessageId, QueueError> {
        self.vacuum()?;

        let ts = now_secs();
        let msg_id = MessageId::generate(ts);

        let mut wtxn = self.store.write_txn()?;
        let inboxes = self.resolve_inboxes(&wtxn, subscribers)?;
        self.write_message(&mut wtxn, &msg_id, ts, payload, subscribers.len(), &inboxes)?;
        wtxn.commit()?;

        if sync {
            self.store.sync()?;
        }
        Ok(msg_id)
    }

    /// Publish a batch of messages in one commit, sharing one timestamp.
    ///
    /// Ordering inside a batch comes from the random id suffix only; callers
    /// needing unique per-message times must use the full message id.
    pub fn put_many(
        &self,
        payloads: &[Vec<u8>],
        subscribers: &[SubscriberId],
        sync: bool,
    ) -> Result<Vec<MessageId>, QueueError> {
        self.vacuum()?;

        let ts = now_secs();
        let mut ids = Vec::with_capacity(payloads.len());

        let mut wtxn = self.store.write_txn()?;
        let inboxes = self.resolve_inboxes(&wtxn, subscribers)?;
        for payload in payloads {
            let msg_id = MessageId::generate(ts);
            self.write_message(&mut wtxn, &msg_id, ts, payload, subscribers.len(), &inboxes)?;
            ids.push(msg_id);
        }
        wtxn.commit()?;

        if sync {
            self.store.sync()?;
        }
        Ok(ids)
    }

    /// Peek at the oldest message pending for `sub_id` without consuming it.
    ///
    /// Returns the message id alongside the payload so callers can later
    /// acknowledge exactly what they saw.
    pub fn front(
        &self,
        sub_id: &SubscriberId,
    ) -> Result<Option<(MessageId, Vec<u8>)>, QueueError> {
        let rtxn = self.store.read_txn()?;
        let inbox = self.inbox(&rtxn, sub_id.as_str())?;

        let Some((key, ())) = inbox.first(&rtxn)? else {
            return Ok(None);
        };
        match self.data_db.get(&rtxn, key)? {
            Some(payload) => Ok(Some((MessageId::from_raw(key), payload.to_vec()))),
            None => Err(QueueError::Inconsistent {
                reason: format!(
                    "message `{key}` is listed in inbox `{sub_id}` but missing from the data database"
                ),
            }),
        }
    }

    /// Consume the oldest message pending for `sub_id`.
    ///
    /// Removes the inbox row and decrements the pending count. The message
    /// itself stays in the store until the next vacuum reaps it.
    pub fn pop(&self, sub_id: &SubscriberId) -> Result<MessageId, QueueError> {
        let mut wtxn = self.store.write_txn()?;
        let inbox = self.inbox(&wtxn, sub_id.as_str())?;

        let first = inbox.first(&wtxn)?.map(|(key, ())| key.to_string());
        let Some(key) = first else {
            return Err(QueueError::Empty {
                subscriber: sub_id.to_string(),
            });
        };

        inbox.delete(&mut wtxn, &key)?;
        self.decrement_pending(&mut wtxn, &key)?;
        wtxn.commit()?;
        Ok(MessageId::from_raw(&key))
    }

    /// Consume one specific message from `sub_id`'s inbox.
    ///
    /// A message that is no longer in the inbox (already consumed, or pruned
    /// between peek and acknowledge) is treated as acknowledged; the pending
    /// count is only decremented when a row was actually removed.
    pub fn pop_message(
        &self,
        sub_id: &SubscriberId,
        msg_id: &MessageId,
    ) -> Result<(), QueueError> {
        let mut wtxn = self.store.write_txn()?;
        let inbox = self.inbox(&wtxn, sub_id.as_str())?;

        if inbox.delete(&mut wtxn, msg_id.as_str())? {
            self.decrement_pending(&mut wtxn, msg_id.as_str())?;
            wtxn.commit()?;
        }
        Ok(())
    }

    /// Number of live messages (entries in the meta database).
    pub fn count(&self) -> Result<u64, QueueError> {
        let rtxn = self.store.read_txn()?;
        Ok(self.meta_db.len(&rtxn)?)
    }

    /// Approximate on-disk size of the data database: page size times the
    /// number of branch, leaf and overflow pages.
    pub fn size_bytes(&self) -> Result<u64, QueueError> {
        let rtxn = self.store.read_txn()?;
        let stat = self.data_db.stat(&rtxn)?;
        let pages = stat.branch_pages as u64 + stat.leaf_pages as u64 + stat.overflow_pages as u64;
        Ok(stat.page_size as u64 * pages)
    }

    /// Remaining subscriber count for a message, if it is still stored.
    pub fn pending_subscribers(&self, msg_id: &MessageId) -> Result<Option<u64>, QueueError> {
        let rtxn = self.store.read_txn()?;
        match self.pending_db.get(&rtxn, msg_id.as_str())? {
            Some(raw) => Ok(Some(parse_decimal(msg_id.as_str(), raw)?)),
            None => Ok(None),
        }
    }

    /// Number of messages pending for one subscriber.
    pub fn inbox_len(&self, sub_id: &SubscriberId) -> Result<u64, QueueError> {
        let rtxn = self.store.read_txn()?;
        let inbox = self.inbox(&rtxn, sub_id.as_str())?;
        Ok(inbox.len(&rtxn)?)
    }

    /// Maintenance step run by every publish: reap dangling messages, then
    /// prune half of the queue for each exceeded high water mark.
    pub fn vacuum(&self) -> Result<(), QueueError> {
        self.prune_dangling()?;
        if self.count()? >= self.hwm.max_msgs_num {
            self.prune_half()?;
        }
        if self.size_bytes()? >= self.hwm.hwm_db_size_bytes {
            self.prune_half()?;
        }
        Ok(())
    }

    /// Delete every dangling message in one transaction.
    ///
    /// Dangling means: pending count zero, or older than the configured
    /// timeout. Timed-out messages are additionally removed from every
    /// registered inbox, since a subscriber may still have been awaiting
    /// them.
    pub fn prune_dangling(&self) -> Result<(), QueueError> {
        let mut wtxn = self.store.write_txn()?;

        let mut doomed = BTreeSet::new();
        for entry in self.pending_db.iter(&wtxn)? {
            let (key, raw) = entry?;
            if parse_decimal(key, raw)? == 0 {
                doomed.insert(key.to_string());
            }
        }

        let now = now_secs();
        let mut timed_out = BTreeSet::new();
        for entry in self.meta_db.iter(&wtxn)? {
            let (key, raw) = entry?;
            let ts = parse_decimal(key, raw)?;
            if now.saturating_sub(ts) > self.hwm.msg_timeout_secs {
                timed_out.insert(key.to_string());
            }
        }

        doomed.extend(timed_out.iter().cloned());
        if doomed.is_empty() {
            return Ok(());
        }

        for key in &doomed {
            self.data_db.delete(&mut wtxn, key)?;
            self.meta_db.delete(&mut wtxn, key)?;
            self.pending_db.delete(&mut wtxn, key)?;
        }
        if !timed_out.is_empty() {
            for sub in &self.subscriber_ids {
                let Some(inbox) = self.store.open_db::<Str, Unit>(&wtxn, sub.as_str())? else {
                    continue;
                };
                for key in &timed_out {
                    inbox.delete(&mut wtxn, key)?;
                }
            }
        }

        tracing::debug!(
            pruned = doomed.len(),
            timed_out = timed_out.len(),
            "reaped dangling messages"
        );
        wtxn.commit()?;
        Ok(())
    }

    /// Delete half of the stored messages: the oldest half under
    /// [`Strategy::PruneFirst`], the newest under [`Strategy::PruneLast`].
    ///
    /// Ids are collected under a read transaction, then deleted from the
    /// three message databases and every registered inbox in one write
    /// transaction.
    pub fn prune_half(&self) -> Result<(), QueueError> {
        let doomed: Vec<String> = {
            let rtxn = self.store.read_txn()?;
            let entries = self.meta_db.len(&rtxn)?;
            if entries == 0 {
                return Ok(());
            }
            let take = (entries / 2 + 1) as usize;
            match self.strategy {
                Strategy::PruneFirst => collect_keys(self.meta_db.iter(&rtxn)?, take)?,
                Strategy::PruneLast => collect_keys(self.meta_db.rev_iter(&rtxn)?, take)?,
            }
        };

        let mut wtxn = self.store.write_txn()?;
        let mut inboxes = Vec::with_capacity(self.subscriber_ids.len());
        for sub in &self.subscriber_ids {
            if let Some(inbox) = self.store.open_db::<Str, Unit>(&wtxn, sub.as_str())? {
                inboxes.push(inbox);
            }
        }
        for key in &doomed {
            self.data_db.delete(&mut wtxn, key)?;
            self.meta_db.delete(&mut wtxn, key)?;
            self.pending_db.delete(&mut wtxn, key)?;
            for inbox in &inboxes {
                inbox.delete(&mut wtxn, key)?;
            }
        }

        tracing::debug!(
            pruned = doomed.len(),
            strategy = %self.strategy,
            "pruned half of the stored messages"
        );
        wtxn.commit()?;
        Ok(())
    }

    pub(crate) fn inbox(&self, rtxn: &RoTxn<'_>, sub_id: &str) -> Result<InboxDb, QueueError> {
        self.store
            .open_db::<Str, Unit>(rtxn, sub_id)?
            .ok_or_else(|| QueueError::UnknownSubscriber {
                subscriber: sub_id.to_string(),
            })
    }

    fn resolve_inboxes(
        &self,
        rtxn: &RoTxn<'_>,
        subscribers: &[SubscriberId],
    ) -> Result<Vec<InboxDb>, QueueError> {
        subscribers
            .iter()
            .map(|sub| {
                if !self.subscriber_ids.contains(sub) {
                    return Err(QueueError::UnknownSubscriber {
                        subscriber: sub.to_string(),
                    });
                }
                self.inbox(rtxn, sub.as_str())
            })
            .collect()
    }

    fn write_message(
        &self,
        wtxn: &mut RwTxn<'_>,
        msg_id: &MessageId,
        ts: u64,
        payload: &[u8],
        subscriber_count: usize,
        inboxes: &[InboxDb],
    ) -> Result<(), QueueError> {
        self.pending_db
            .put(wtxn, msg_id.as_str(), &subscriber_count.to_string())?;
        self.meta_db.put(wtxn, msg_id.as_str(), &ts.to_string())?;
        self.data_db.put(wtxn, msg_id.as_str(), payload)?;
        for inbox in inboxes {
            inbox.put(wtxn, msg_id.as_str(), &())?;
        }
        Ok(())
    }

    pub(crate) fn decrement_pending(&self, wtxn: &mut RwTxn<'_>, key: &str) -> Result<(), QueueError> {
        let remaining = {
            let raw = self
                .pending_db
                .get(wtxn, key)?
                .ok_or_else(|| QueueError::Inconsistent {
                    reason: format!("message `{key}` has no pending count"),
                })?;
            parse_decimal(key, raw)?
        };
        let next = remaining
            .checked_sub(1)
            .ok_or_else(|| QueueError::Inconsistent {
                reason: format!("pending count for message `{key}` is already zero"),
            })?;
        self.pending_db.put(wtxn, key, &next.to_string())?;
        Ok(())
    }
}

fn read_queue_data(store: &Store, queue_db: TextDb) -> Result<QueueData, QueueError> {
    let rtxn = store.read_txn()?;
    let require = |key: &'static str| -> Result<String, QueueError> {
        match queue_db.get(&rtxn, key)? {
            Some(value) => Ok(value.to_string()),
            None => Err(QueueError::NotInitialized {
                path: store.path().to_path_buf(),
                key,
            }),
        }
    };

    let hwm = HighWaterMark {
        msg_timeout_secs: parse_decimal(MSG_TIMEOUT_SECS_KEY, &require(MSG_TIMEOUT_SECS_KEY)?)?,
        max_msgs_num: parse_decimal(MAX_MSGS_NUM_KEY, &require(MAX_MSGS_NUM_KEY)?)?,
        hwm_db_size_bytes: parse_decimal(HWM_DB_SIZE_BYTES_KEY, &require(HWM_DB_SIZE_BYTES_KEY)?)?,
    };
    let strategy = parse_strategy(&require(STRATEGY_KEY)?)?;
    let subscriber_ids = require(SUBSCRIBER_IDS_KEY)?
        .split_whitespace()
        .map(SubscriberId::new)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueueData {
        hwm,
        strategy,
        subscriber_ids,
    })
}

fn parse_decimal(key: &str, raw: &str) -> Result<u64, QueueError> {
    raw.parse().map_err(|_| QueueError::Inconsistent {
        reason: format!("value `{raw}` for `{key}` is not a decimal number"),
    })
}

fn collect_keys<'t, I>(iter: I, take: usize) -> Result<Vec<String>, QueueError>
where
    I: Iterator<Item = Result<(&'t str, &'t str), heed::Error>>,
{
    iter.take(take)
        .map(|entry| {
            entry
                .map(|(key, _)| key.to_string())
                .map_err(QueueError::from)
        })
        .collect()
}
