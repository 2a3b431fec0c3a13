//! Persistent state store using sled database

use async_trait::async_trait;
use keyledger_core::{
    KeyledgerError, KeyledgerResult, StateChange, StateMutator, StateProvider, StateVersion,
};
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

use crate::store::{StateEntry, StateStore};

const STATE_TREE: &str = "state";
const META_TREE: &str = "meta";
const VERSION_KEY: &[u8] = b"version";

fn storage_err(e: sled::Error) -> KeyledgerError {
    KeyledgerError::StorageError(e.to_string())
}

/// Persistent state store backed by sled database
pub struct PersistentStateStore {
    db: Db,
    state: Tree,
    meta: Tree,
    version: RwLock<StateVersion>,
}

impl PersistentStateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> KeyledgerResult<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        let state = db.open_tree(STATE_TREE).map_err(storage_err)?;
        let meta = db.open_tree(META_TREE).map_err(storage_err)?;

        // Load version from disk or start at 0
        let version = match meta.get(VERSION_KEY).map_err(storage_err)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    KeyledgerError::StorageError("malformed version record".into())
                })?;
                StateVersion::new(u64::from_le_bytes(raw))
            }
            None => StateVersion::new(0),
        };

        debug!("Opened state store at version {}", version);

        Ok(Self {
            db,
            state,
            meta,
            version: RwLock::new(version),
        })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> KeyledgerResult<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl StateProvider for PersistentStateStore {
    async fn version(&self) -> StateVersion {
        *self.version.read()
    }

    async fn get(&self, key: &[u8]) -> KeyledgerResult<Option<Vec<u8>>> {
        self.state
            .get(key)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(storage_err)
    }

    async fn exists(&self, key: &[u8]) -> KeyledgerResult<bool> {
        self.state.contains_key(key).map_err(storage_err)
    }
}

#[async_trait]
impl StateMutator for PersistentStateStore {
    async fn set(&self, key: &[u8], value: &[u8]) -> KeyledgerResult<()> {
        self.state.insert(key, value).map_err(storage_err)?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> KeyledgerResult<()> {
        self.state.remove(key).map_err(storage_err)?;
        Ok(())
    }

    async fn apply_batch(&self, changes: Vec<StateChange>) -> KeyledgerResult<StateVersion> {
        let mut version = self.version.write();
        let new_version = version.next();

        // Create a batch for atomic writes
        let mut batch = sled::Batch::default();
        for change in changes {
            match change {
                StateChange::Set { key, value } => batch.insert(key, value),
                StateChange::Delete { key } => batch.remove(key),
            }
        }

        self.state.apply_batch(batch).map_err(storage_err)?;
        self.meta
            .insert(VERSION_KEY, &new_version.0.to_le_bytes())
            .map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;

        *version = new_version;
        Ok(new_version)
    }
}

#[async_trait]
impl StateStore for PersistentStateStore {
    async fn entries_with_prefix(&self, prefix: &[u8]) -> KeyledgerResult<Vec<StateEntry>> {
        self.state
            .scan_prefix(prefix)
            .map(|result| {
                result
                    .map(|(key, value)| StateEntry {
                        key: key.to_vec(),
                        value: value.to_vec(),
                    })
                    .map_err(storage_err)
            })
            .collect()
    }

    async fn len(&self) -> KeyledgerResult<usize> {
        Ok(self.state.len())
    }
}
