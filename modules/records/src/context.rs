//! Per-transaction state context
//!
//! A `ScopedContext` reads through three layers: its own pending writes, the
//! writes of earlier transactions in the same batch, then the store. Nothing
//! reaches the store until the executor commits the whole batch.

use async_trait::async_trait;
use keyledger_core::{Address, KeyledgerError, KeyledgerResult, StateChange, TransactionContext};
use keyledger_state::StateStore;
use std::collections::BTreeMap;

/// Staged writes keyed by address; `None` marks a deletion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingWrites {
    writes: BTreeMap<Address, Option<Vec<u8>>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Staged value for `address`: `Some(None)` if staged for deletion,
    /// `None` if untouched
    pub fn get(&self, address: &Address) -> Option<Option<&[u8]>> {
        self.writes.get(address).map(|value| value.as_deref())
    }

    pub fn set(&mut self, address: Address, value: Vec<u8>) {
        self.writes.insert(address, Some(value));
    }

    pub fn delete(&mut self, address: Address) {
        self.writes.insert(address, None);
    }

    /// Layer `other` on top of these writes
    pub fn merge(&mut self, other: PendingWrites) {
        self.writes.extend(other.writes);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_changes(self) -> Vec<StateChange> {
        self.writes
            .into_iter()
            .map(|(address, value)| {
                let key = address.as_str().as_bytes().to_vec();
                match value {
                    Some(value) => StateChange::Set { key, value },
                    None => StateChange::Delete { key },
                }
            })
            .collect()
    }
}

/// State context limited to a transaction's declared inputs and outputs
pub struct ScopedContext<'a, S: StateStore + ?Sized> {
    store: &'a S,
    batch: &'a PendingWrites,
    inputs: Vec<Address>,
    outputs: Vec<Address>,
    pending: PendingWrites,
}

impl<'a, S: StateStore + ?Sized> ScopedContext<'a, S> {
    pub fn new(
        store: &'a S,
        batch: &'a PendingWrites,
        inputs: &[Address],
        outputs: &[Address],
    ) -> Self {
        Self {
            store,
            batch,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            pending: PendingWrites::new(),
        }
    }

    /// Writes staged by this transaction
    pub fn into_writes(self) -> PendingWrites {
        self.pending
    }

    fn authorize(
        declared: &[Address],
        address: &Address,
        access: &'static str,
    ) -> KeyledgerResult<()> {
        if declared.contains(address) {
            Ok(())
        } else {
            Err(KeyledgerError::UnauthorizedAddress {
                address: address.to_string(),
                access,
            })
        }
    }

    async fn current(&self, address: &Address) -> KeyledgerResult<Option<Vec<u8>>> {
        if let Some(staged) = self.pending.get(address) {
            return Ok(staged.map(<[u8]>::to_vec));
        }
        if let Some(staged) = self.batch.get(address) {
            return Ok(staged.map(<[u8]>::to_vec));
        }
        self.store.get(address.as_str().as_bytes()).await
    }
}

#[async_trait]
impl<'a, S: StateStore + ?Sized> TransactionContext for ScopedContext<'a, S> {
    async fn get_state(&self, addresses: &[Address]) -> KeyledgerResult<Vec<(Address, Vec<u8>)>> {
        let mut found = Vec::with_capacity(addresses.len());
        for address in addresses {
            Self::authorize(&self.inputs, address, "input")?;
            if let Some(value) = self.current(address).await? {
                found.push((address.clone(), value));
            }
        }
        Ok(found)
    }

    async fn set_state(&mut self, entries: Vec<(Address, Vec<u8>)>) -> KeyledgerResult<()> {
        for (address, _) in &entries {
            Self::authorize(&self.outputs, address, "output")?;
        }
        for (address, value) in entries {
            self.pending.set(address, value);
        }
        Ok(())
    }

    async fn delete_state(&mut self, addresses: &[Address]) -> KeyledgerResult<Vec<Address>> {
        for address in addresses {
            Self::authorize(&self.outputs, address, "output")?;
        }
        let mut deleted = Vec::new();
        for address in addresses {
            if self.current(address).await?.is_some() {
                deleted.push(address.clone());
            }
            self.pending.delete(address.clone());
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::record_address;
    use keyledger_core::{RecordKey, StateMutator, StateProvider};
    use keyledger_state::MemoryStateStore;

    fn addr(key: &str) -> Address {
        record_address(&RecordKey::new(key).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_reads_through_layers() {
        let store = MemoryStateStore::new();
        let a = addr("a");
        let b = addr("b");
        store.set(a.as_str().as_bytes(), b"stored").await.unwrap();

        let mut batch = PendingWrites::new();
        batch.set(b.clone(), b"from batch".to_vec());

        let declared = vec![a.clone(), b.clone()];
        let mut ctx = ScopedContext::new(&store, &batch, &declared, &declared);

        let found = ctx.get_state(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(found, vec![(a.clone(), b"stored".to_vec()), (b.clone(), b"from batch".to_vec())]);

        ctx.set_state(vec![(a.clone(), b"staged".to_vec())]).await.unwrap();
        let found = ctx.get_state(&[a.clone()]).await.unwrap();
        assert_eq!(found, vec![(a.clone(), b"staged".to_vec())]);

        // Store untouched until commit
        assert_eq!(store.get(a.as_str().as_bytes()).await.unwrap(), Some(b"stored".to_vec()));
    }

    #[tokio::test]
    async fn test_undeclared_addresses_rejected() {
        let store = MemoryStateStore::new();
        let batch = PendingWrites::new();
        let a = addr("a");
        let b = addr("b");
        let mut ctx = ScopedContext::new(&store, &batch, &[a.clone()], &[a.clone()]);

        assert!(matches!(
            ctx.get_state(&[b.clone()]).await,
            Err(KeyledgerError::UnauthorizedAddress { access: "input", .. })
        ));
        assert!(matches!(
            ctx.set_state(vec![(b.clone(), vec![1])]).await,
            Err(KeyledgerError::UnauthorizedAddress { access: "output", .. })
        ));
        assert!(ctx.delete_state(&[b]).await.is_err());
        assert!(ctx.into_writes().is_empty());
    }

    #[tokio::test]
    async fn test_inputs_and_outputs_checked_separately() {
        let store = MemoryStateStore::new();
        let batch = PendingWrites::new();
        let a = addr("a");
        let b = addr("b");
        let mut ctx = ScopedContext::new(&store, &batch, &[a.clone()], &[b.clone()]);

        assert!(ctx.get_state(&[a.clone()]).await.unwrap().is_empty());
        assert!(ctx.get_state(&[b.clone()]).await.is_err());
        assert!(ctx.set_state(vec![(a, vec![1])]).await.is_err());
        assert!(ctx.set_state(vec![(b, vec![2])]).await.is_ok());
        assert_eq!(ctx.into_writes().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_existing() {
        let store = MemoryStateStore::new();
        let a = addr("a");
        let b = addr("b");
        store.set(a.as_str().as_bytes(), b"x").await.unwrap();

        let batch = PendingWrites::new();
        let declared = vec![a.clone(), b.clone()];
        let mut ctx = ScopedContext::new(&store, &batch, &declared, &declared);

        let deleted = ctx.delete_state(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(deleted, vec![a.clone()]);
        assert!(ctx.get_state(&[a.clone()]).await.unwrap().is_empty());

        let changes = ctx.into_writes().into_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| matches!(c, StateChange::Delete { .. })));
    }

    #[test]
    fn test_merge_overrides() {
        let a = addr("a");
        let mut base = PendingWrites::new();
        base.set(a.clone(), vec![1]);

        let mut later = PendingWrites::new();
        later.delete(a.clone());
        base.merge(later);

        assert_eq!(base.get(&a), Some(None));
        assert_eq!(
            base.into_changes(),
            vec![StateChange::Delete { key: a.as_str().as_bytes().to_vec() }]
        );
    }
}
