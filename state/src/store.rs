//! Core state store traits and types

use async_trait::async_trait;
use keyledger_core::{KeyledgerResult, StateMutator, StateProvider};

/// One key/value pair held by a state store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Abstract state store interface
#[async_trait]
pub trait StateStore: StateProvider + StateMutator {
    /// Entries whose key starts with `prefix`, ordered by key
    async fn entries_with_prefix(&self, prefix: &[u8]) -> KeyledgerResult<Vec<StateEntry>>;

    /// Get all entries, ordered by key
    async fn all_entries(&self) -> KeyledgerResult<Vec<StateEntry>> {
        self.entries_with_prefix(&[]).await
    }

    /// Number of stored entries
    async fn len(&self) -> KeyledgerResult<usize> {
        Ok(self.all_entries().await?.len())
    }
}
