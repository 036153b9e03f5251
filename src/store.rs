//! Thin adapter over the memory-mapped LMDB store.
//!
//! A [`Store`] owns the environment handle for one queue directory and hands
//! out transactions and named-database handles. All policy (which databases
//! exist, what their keys mean) lives in the queue layer; this module only
//! knows how to open things.

use std::io;
use std::path::{Path, PathBuf};

use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use thiserror::Error;

/// Default maximal number of simultaneous read transactions.
pub const DEFAULT_MAX_READERS: u32 = 1024;
/// Default maximal number of named databases.
pub const DEFAULT_MAX_DBS: u32 = 1024;
/// Default memory-map size (32 GiB); LMDB never grows past it.
pub const DEFAULT_MAP_SIZE: usize = 32 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue directory does not exist: {0:?}")]
    MissingDirectory(PathBuf),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("lmdb error: {0}")]
    Lmdb(#[from] heed::Error),
}

/// Handle on the LMDB environment inside a queue directory.
///
/// Cloning is cheap; all clones share one environment. Writes are serialized
/// by LMDB itself: at most one write transaction is live per environment,
/// readers never block writers and writers never block readers.
#[derive(Clone, Debug)]
pub struct Store {
    env: Env,
    path: PathBuf,
}

impl Store {
    /// Open the environment at `dir`. The directory must already exist; the
    /// control plane is responsible for creating it.
    pub fn open(
        dir: &Path,
        max_readers: u32,
        max_dbs: u32,
        map_size: usize,
    ) -> Result<Self, StoreError> {
        if !dir.is_dir() {
            return Err(StoreError::MissingDirectory(dir.to_path_buf()));
        }

        // SAFETY: heed rejects opening the same path twice in one process,
        // which is the only way to break LMDB's aliasing rules from here.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(max_dbs)
                .max_readers(max_readers)
                .open(dir)?
        };

        Ok(Self {
            env,
            path: dir.to_path_buf(),
        })
    }

    /// Wrap an environment that is already open, e.g. one shared by an
    /// [`Environment`](crate::Environment) across several facades.
    pub fn from_env(dir: &Path, env: Env) -> Self {
        Self {
            env,
            path: dir.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn read_txn(&self) -> Result<RoTxn<'_>, StoreError> {
        Ok(self.env.read_txn()?)
    }

    /// Blocks until the single writer slot of the environment is free.
    pub fn write_txn(&self) -> Result<RwTxn<'_>, StoreError> {
        Ok(self.env.write_txn()?)
    }

    /// Open a named database, creating it if missing.
    pub fn create_db<KC: 'static, DC: 'static>(
        &self,
        wtxn: &mut RwTxn<'_>,
        name: &str,
    ) -> Result<Database<KC, DC>, StoreError> {
        Ok(self.env.create_database(wtxn, Some(name))?)
    }

    /// Open a named database that may not exist yet.
    pub fn open_db<KC: 'static, DC: 'static>(
        &self,
        rtxn: &RoTxn<'_>,
        name: &str,
    ) -> Result<Option<Database<KC, DC>>, StoreError> {
        Ok(self.env.open_database(rtxn, Some(name))?)
    }

    /// Force a durable flush of all committed data to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        Ok(self.env.force_sync()?)
    }
}

#[cfg(test)]
mod tests {
    use heed::types::{Bytes, Str};
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn open_rejects_missing_directory() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        let err = Store::open(&missing, 8, 8, 1024 * 1024).unwrap_err();
        assert!(matches!(err, StoreError::MissingDirectory(_)));
    }

    #[test]
    fn named_database_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path(), 8, 8, 10 * 1024 * 1024).unwrap();

        let mut wtxn = store.write_txn().unwrap();
        let db = store.create_db::<Str, Bytes>(&mut wtxn, "scratch").unwrap();
        db.put(&mut wtxn, "k", b"v").unwrap();
        wtxn.commit().unwrap();

        let rtxn = store.read_txn().unwrap();
        assert_eq!(db.get(&rtxn, "k").unwrap(), Some(&b"v"[..]));
    }

    #[test]
    fn open_db_returns_none_for_unknown_name() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path(), 8, 8, 10 * 1024 * 1024).unwrap();

        let rtxn = store.read_txn().unwrap();
        let db = store.open_db::<Str, Bytes>(&rtxn, "ghost").unwrap();
        assert!(db.is_none());
    }
}
