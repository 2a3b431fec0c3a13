//! In-memory state store for tests and the default dev node

use async_trait::async_trait;
use dashmap::DashMap;
use keyledger_core::{KeyledgerResult, StateChange, StateMutator, StateProvider, StateVersion};
use parking_lot::RwLock;

use crate::store::{StateEntry, StateStore};

/// In-memory state store
pub struct MemoryStateStore {
    data: DashMap<Vec<u8>, Vec<u8>>,
    version: RwLock<StateVersion>,
    // Serializes batches so readers never observe half of one
    commit: RwLock<()>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            version: RwLock::new(StateVersion::new(0)),
            commit: RwLock::new(()),
        }
    }

    pub fn with_data(data: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        let store = Self::new();
        for (key, value) in data {
            store.data.insert(key, value);
        }
        store
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateProvider for MemoryStateStore {
    async fn version(&self) -> StateVersion {
        *self.version.read()
    }

    async fn get(&self, key: &[u8]) -> KeyledgerResult<Option<Vec<u8>>> {
        let _guard = self.commit.read();
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    async fn exists(&self, key: &[u8]) -> KeyledgerResult<bool> {
        Ok(self.data.contains_key(key))
    }
}

#[async_trait]
impl StateMutator for MemoryStateStore {
    async fn set(&self, key: &[u8], value: &[u8]) -> KeyledgerResult<()> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> KeyledgerResult<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn apply_batch(&self, changes: Vec<StateChange>) -> KeyledgerResult<StateVersion> {
        let _guard = self.commit.write();

        for change in changes {
            match change {
                StateChange::Set { key, value } => {
                    self.data.insert(key, value);
                }
                StateChange::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }

        let mut version = self.version.write();
        *version = version.next();
        Ok(*version)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn entries_with_prefix(&self, prefix: &[u8]) -> KeyledgerResult<Vec<StateEntry>> {
        let _guard = self.commit.read();
        let mut entries: Vec<StateEntry> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| StateEntry {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
