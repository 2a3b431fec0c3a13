//! Core traits defining KEYLEDGER interfaces
//!
//! These traits define the contracts between the record family, the state
//! backends and the service that hosts them.

use crate::types::*;
use async_trait::async_trait;

/// Result type for KEYLEDGER operations
pub type KeyledgerResult<T> = Result<T, crate::error::KeyledgerError>;

/// Trait for signable envelope headers
pub trait Signable {
    /// Get the exact bytes the signature covers
    fn signing_bytes(&self) -> KeyledgerResult<Vec<u8>>;
}

/// State provider trait
#[async_trait]
pub trait StateProvider: Send + Sync {
    /// Get the current state version
    async fn version(&self) -> StateVersion;

    /// Get a value by key
    async fn get(&self, key: &[u8]) -> KeyledgerResult<Option<Vec<u8>>>;

    /// Check if a key exists
    async fn exists(&self, key: &[u8]) -> KeyledgerResult<bool>;
}

/// State mutator trait
#[async_trait]
pub trait StateMutator: StateProvider {
    /// Set a value
    async fn set(&self, key: &[u8], value: &[u8]) -> KeyledgerResult<()>;

    /// Delete a key
    async fn delete(&self, key: &[u8]) -> KeyledgerResult<()>;

    /// Apply a batch of changes atomically
    async fn apply_batch(&self, changes: Vec<StateChange>) -> KeyledgerResult<StateVersion>;
}

/// State change operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Per-transaction view of state handed to a transaction handler
///
/// Reads and writes are limited to the addresses the transaction declared.
/// Writes only reach the backing store if the whole transaction succeeds.
#[async_trait]
pub trait TransactionContext: Send + Sync {
    /// Fetch the entries that exist among `addresses`
    async fn get_state(&self, addresses: &[Address]) -> KeyledgerResult<Vec<(Address, Vec<u8>)>>;

    /// Stage new values for the given addresses
    async fn set_state(&mut self, entries: Vec<(Address, Vec<u8>)>) -> KeyledgerResult<()>;

    /// Stage deletion of the given addresses, returning the ones that existed
    async fn delete_state(&mut self, addresses: &[Address]) -> KeyledgerResult<Vec<Address>>;
}
