//! Record family transaction handler

use async_trait::async_trait;
use keyledger_core::{
    Action, KeyledgerError, KeyledgerResult, Namespace, TransactionContext, FAMILY_NAME,
    FAMILY_VERSION,
};
use tracing::{debug, info};

use crate::address::{family_namespace, record_address};
use crate::payload::RecordPayload;
use crate::record_set::RecordSet;
use crate::transaction::Transaction;

/// Applies transactions of one family to state
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    fn family_name(&self) -> &str;

    fn family_versions(&self) -> Vec<String>;

    fn namespaces(&self) -> Vec<Namespace>;

    /// Validate `transaction` against current state and stage its writes in `context`
    async fn apply(
        &self,
        transaction: &Transaction,
        context: &mut dyn TransactionContext,
    ) -> KeyledgerResult<()>;
}

/// Handler for create, update and delete of named records
///
/// Holds no state of its own: every apply re-reads the record set
/// through the context.
#[derive(Debug, Clone, Default)]
pub struct RecordStore;

impl RecordStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransactionHandler for RecordStore {
    fn family_name(&self) -> &str {
        FAMILY_NAME
    }

    fn family_versions(&self) -> Vec<String> {
        vec![FAMILY_VERSION.to_string()]
    }

    fn namespaces(&self) -> Vec<Namespace> {
        vec![family_namespace().clone()]
    }

    async fn apply(
        &self,
        transaction: &Transaction,
        context: &mut dyn TransactionContext,
    ) -> KeyledgerResult<()> {
        let payload = RecordPayload::decode(&transaction.payload)?;
        let key = payload.key();
        let address = record_address(key)?;

        // The record's own address is the only one a transaction may touch
        let header = transaction.decode_header()?;
        let declared = std::slice::from_ref(&address);
        if header.inputs.as_slice() != declared || header.outputs.as_slice() != declared {
            return Err(KeyledgerError::InvalidTransaction(format!(
                "{} must declare exactly {} as input and output",
                key, address
            )));
        }

        let mut records = match context
            .get_state(std::slice::from_ref(&address))
            .await?
            .into_iter()
            .next()
        {
            Some((_, blob)) => RecordSet::deserialize(&blob).map_err(|e| e.at(&address))?,
            None => RecordSet::new(),
        };

        debug!(
            "Applying {} for {} ({} record(s) at address)",
            payload.action(),
            key,
            records.len()
        );

        match payload.action() {
            Action::Create => {
                if records.contains(key) {
                    return Err(KeyledgerError::AlreadyExists(key.to_string()));
                }
                records.insert(payload.to_record());
            }
            Action::Update => {
                if !records.contains(key) {
                    return Err(KeyledgerError::NotFound(key.to_string()));
                }
                records.insert(payload.to_record());
            }
            Action::Delete => {
                if records.remove(key).is_none() {
                    return Err(KeyledgerError::NotFound(key.to_string()));
                }
            }
        }

        if records.is_empty() {
            context.delete_state(std::slice::from_ref(&address)).await?;
        } else {
            context.set_state(vec![(address, records.serialize())]).await?;
        }

        info!("{} {}", payload.action(), key);
        Ok(())
    }
}
