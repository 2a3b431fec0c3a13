//! Node runtime: batch queue, executor and status tracking

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keyledger_core::{
    Address, BatchStatus, KeyledgerError, KeyledgerResult, NodeConfig, StateVersion,
};
use keyledger_records::{
    Batch, BatchList, EnvelopeValidator, PendingWrites, RecordStore, ScopedContext,
    TransactionHandler,
};
use keyledger_state::{StateEntry, StateStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Transaction that made its batch invalid
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidTransaction {
    pub id: String,
    pub message: String,
}

/// Status of one submitted batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchStatusEntry {
    pub id: String,
    pub status: BatchStatus,
    pub invalid_transactions: Vec<InvalidTransaction>,
}

impl BatchStatusEntry {
    fn new(id: &str, status: BatchStatus) -> Self {
        Self {
            id: id.to_string(),
            status,
            invalid_transactions: Vec::new(),
        }
    }
}

/// One page of a state listing
#[derive(Debug, Clone, Default)]
pub struct StatePage {
    pub entries: Vec<StateEntry>,
    /// Address the next page starts at
    pub next: Option<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Rejected(#[from] KeyledgerError),

    #[error("batch queue is full")]
    QueueFull,

    #[error("batch executor has stopped")]
    Closed,
}

/// Node runtime shared by the API handlers and the executor task
pub struct NodeRuntime {
    config: NodeConfig,
    state: Arc<dyn StateStore>,
    handler: Arc<dyn TransactionHandler>,
    validator: EnvelopeValidator,
    statuses: DashMap<String, BatchStatusEntry>,
    status_changed: Notify,
    queue: mpsc::Sender<Batch>,
    receiver: Mutex<Option<mpsc::Receiver<Batch>>>,
}

impl NodeRuntime {
    /// Create a runtime serving the record family over `state`
    pub fn new(config: NodeConfig, state: Arc<dyn StateStore>) -> Arc<Self> {
        Self::with_handler(config, state, Arc::new(RecordStore::new()))
    }

    pub fn with_handler(
        config: NodeConfig,
        state: Arc<dyn StateStore>,
        handler: Arc<dyn TransactionHandler>,
    ) -> Arc<Self> {
        let (queue, receiver) = mpsc::channel(config.max_queue.max(1));
        let validator = EnvelopeValidator::for_handler(handler.as_ref());

        info!(
            "Serving family {} {:?} in namespace(s) {:?}",
            handler.family_name(),
            handler.family_versions(),
            handler.namespaces()
        );

        Arc::new(Self {
            config,
            state,
            handler,
            validator,
            statuses: DashMap::new(),
            status_changed: Notify::new(),
            queue,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Start the task that applies queued batches in arrival order
    pub fn spawn_executor(self: &Arc<Self>) -> KeyledgerResult<JoinHandle<()>> {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| KeyledgerError::Internal("executor already running".into()))?;

        let runtime = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(batch) = receiver.recv().await {
                runtime.execute_batch(batch).await;
            }
            debug!("Batch queue closed, executor stopping");
        }))
    }

    /// Validate and enqueue batches, returning their ids
    ///
    /// Nothing is enqueued unless every batch passes envelope validation.
    pub fn submit_batches(&self, list: BatchList) -> Result<Vec<String>, SubmitError> {
        if list.batches.is_empty() {
            return Err(KeyledgerError::InvalidBatch("no batches submitted".into()).into());
        }
        for batch in &list.batches {
            self.validator.validate_batch(batch)?;
        }

        let ids = list.batch_ids();
        for batch in list.batches {
            let id = batch.id().to_string();
            match self.statuses.entry(id.clone()) {
                Entry::Occupied(_) => {
                    debug!("Batch {} already submitted", short(&id));
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(BatchStatusEntry::new(&id, BatchStatus::Pending));
                }
            }
            if let Err(e) = self.queue.try_send(batch) {
                self.statuses.remove(&id);
                return Err(match e {
                    mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
                });
            }
            info!("Batch {} queued", short(&id));
        }
        Ok(ids)
    }

    /// Current status of each id; unknown ids report UNKNOWN
    pub fn batch_statuses(&self, ids: &[String]) -> Vec<BatchStatusEntry> {
        ids.iter()
            .map(|id| match self.statuses.get(id) {
                Some(entry) => entry.value().clone(),
                None => BatchStatusEntry::new(id, BatchStatus::Unknown),
            })
            .collect()
    }

    /// Wait up to `wait` (capped by `max_status_wait`) for every id to leave PENDING
    pub async fn wait_for_statuses(&self, ids: &[String], wait: Duration) -> Vec<BatchStatusEntry> {
        let wait = wait.min(Duration::from_secs(self.config.max_status_wait));
        let deadline = Instant::now() + wait;

        loop {
            // Registered before reading, so a status change in between still wakes us
            let notified = self.status_changed.notified();

            let statuses = self.batch_statuses(ids);
            let settled = statuses.iter().all(|s| s.status != BatchStatus::Pending);
            let now = Instant::now();
            if settled || now >= deadline {
                return statuses;
            }

            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    pub async fn get_state(&self, address: &Address) -> KeyledgerResult<Option<Vec<u8>>> {
        self.state.get(address.as_str().as_bytes()).await
    }

    /// Entries under `prefix` in address order, starting at `start`
    pub async fn list_state(
        &self,
        prefix: &str,
        start: Option<&str>,
        limit: usize,
    ) -> KeyledgerResult<StatePage> {
        let limit = limit.max(1);
        let mut entries: Vec<StateEntry> = self
            .state
            .entries_with_prefix(prefix.as_bytes())
            .await?
            .into_iter()
            .filter(|entry| start.map_or(true, |s| entry.key.as_slice() >= s.as_bytes()))
            .take(limit + 1)
            .collect();

        let next = if entries.len() > limit {
            entries
                .pop()
                .map(|entry| String::from_utf8_lossy(&entry.key).into_owned())
        } else {
            None
        };

        Ok(StatePage { entries, next })
    }

    pub async fn state_version(&self) -> StateVersion {
        self.state.version().await
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    async fn execute_batch(&self, batch: Batch) {
        let id = batch.id().to_string();

        let entry = match self.apply_batch(&batch).await {
            Ok(version) => {
                info!(
                    "Batch {} committed ({} transaction(s), state version {})",
                    short(&id),
                    batch.transactions.len(),
                    version
                );
                BatchStatusEntry::new(&id, BatchStatus::Committed)
            }
            Err(invalid_transactions) => {
                for invalid in &invalid_transactions {
                    warn!(
                        "Batch {} invalid: transaction {}: {}",
                        short(&id),
                        short(&invalid.id),
                        invalid.message
                    );
                }
                BatchStatusEntry {
                    invalid_transactions,
                    ..BatchStatusEntry::new(&id, BatchStatus::Invalid)
                }
            }
        };

        self.statuses.insert(id, entry);
        self.status_changed.notify_waiters();
    }

    /// Run every transaction against an overlay of the batch's earlier writes,
    /// then commit the overlay in one store batch
    async fn apply_batch(&self, batch: &Batch) -> Result<StateVersion, Vec<InvalidTransaction>> {
        let mut overlay = PendingWrites::new();

        for transaction in &batch.transactions {
            let invalid = |e: KeyledgerError| {
                if !e.is_invalid_transaction() {
                    error!("Transaction {} failed: {}", short(transaction.id()), e);
                }
                vec![InvalidTransaction {
                    id: transaction.id().to_string(),
                    message: e.to_string(),
                }]
            };

            let header = transaction.decode_header().map_err(invalid)?;
            let mut context =
                ScopedContext::new(self.state.as_ref(), &overlay, &header.inputs, &header.outputs);
            self.handler
                .apply(transaction, &mut context)
                .await
                .map_err(invalid)?;

            let writes = context.into_writes();
            overlay.merge(writes);
        }

        self.state
            .apply_batch(overlay.into_changes())
            .await
            .map_err(|e| {
                error!("Failed to commit batch {}: {}", short(batch.id()), e);
                Vec::new()
            })
    }
}

fn short(id: &str) -> &str {
    id.get(..16).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyledger_core::{RecordKey, Signable};
    use keyledger_crypto::keys::KeyPair;
    use keyledger_crypto::signing::sign;
    use keyledger_records::{record_address, RecordPayload, Transaction, TransactionBuilder};
    use keyledger_state::MemoryStateStore;

    fn runtime() -> Arc<NodeRuntime> {
        NodeRuntime::new(NodeConfig::default(), Arc::new(MemoryStateStore::new()))
    }

    fn key(s: &str) -> RecordKey {
        RecordKey::new(s).unwrap()
    }

    fn tx(kp: &KeyPair, payload: RecordPayload) -> Transaction {
        TransactionBuilder::new(Some(kp)).build_transaction(&payload).unwrap()
    }

    fn batch_list(kp: &KeyPair, transactions: Vec<Transaction>) -> BatchList {
        let batch = TransactionBuilder::new(Some(kp)).build_batch(transactions).unwrap();
        BatchList::new(vec![batch])
    }

    async fn settle(runtime: &NodeRuntime, ids: &[String]) -> Vec<BatchStatusEntry> {
        runtime.wait_for_statuses(ids, Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn test_batch_committed() {
        let runtime = runtime();
        runtime.spawn_executor().unwrap();
        let kp = KeyPair::generate();

        let create = RecordPayload::create(key("farmA"), vec!["42".into()]).unwrap();
        let ids = runtime
            .submit_batches(batch_list(&kp, vec![tx(&kp, create)]))
            .unwrap();

        let statuses = settle(&runtime, &ids).await;
        assert_eq!(statuses[0].status, BatchStatus::Committed);
        assert!(statuses[0].invalid_transactions.is_empty());

        let address = record_address(&key("farmA")).unwrap();
        assert_eq!(runtime.get_state(&address).await.unwrap(), Some(b"farmA,42".to_vec()));
    }

    #[tokio::test]
    async fn test_invalid_transaction_reported() {
        let runtime = runtime();
        runtime.spawn_executor().unwrap();
        let kp = KeyPair::generate();

        let delete = tx(&kp, RecordPayload::delete(key("farmA")).unwrap());
        let tx_id = delete.id().to_string();
        let ids = runtime.submit_batches(batch_list(&kp, vec![delete])).unwrap();

        let statuses = settle(&runtime, &ids).await;
        assert_eq!(statuses[0].status, BatchStatus::Invalid);
        assert_eq!(statuses[0].invalid_transactions[0].id, tx_id);
        assert!(statuses[0].invalid_transactions[0].message.contains("not found"));
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let runtime = runtime();
        runtime.spawn_executor().unwrap();
        let kp = KeyPair::generate();

        let transactions = vec![
            tx(&kp, RecordPayload::create(key("farmB"), vec!["1".into()]).unwrap()),
            tx(&kp, RecordPayload::create(key("farmA"), vec!["1".into()]).unwrap()),
            tx(&kp, RecordPayload::create(key("farmA"), vec!["2".into()]).unwrap()),
        ];
        let ids = runtime.submit_batches(batch_list(&kp, transactions)).unwrap();

        let statuses = settle(&runtime, &ids).await;
        assert_eq!(statuses[0].status, BatchStatus::Invalid);

        let page = runtime.list_state("", None, 100).await.unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test]
    async fn test_later_transactions_see_earlier_writes() {
        let runtime = runtime();
        runtime.spawn_executor().unwrap();
        let kp = KeyPair::generate();

        let transactions = vec![
            tx(&kp, RecordPayload::create(key("farmA"), vec!["1".into()]).unwrap()),
            tx(&kp, RecordPayload::update(key("farmA"), vec!["2".into()]).unwrap()),
        ];
        let ids = runtime.submit_batches(batch_list(&kp, transactions)).unwrap();
        assert_eq!(settle(&runtime, &ids).await[0].status, BatchStatus::Committed);

        let address = record_address(&key("farmA")).unwrap();
        assert_eq!(runtime.get_state(&address).await.unwrap(), Some(b"farmA,2".to_vec()));
    }

    #[tokio::test]
    async fn test_bad_envelope_rejected_at_submit() {
        let runtime = runtime();
        let kp = KeyPair::generate();

        let mut list = batch_list(
            &kp,
            vec![tx(&kp, RecordPayload::delete(key("farmA")).unwrap())],
        );
        list.batches[0].transactions[0].payload = b"farmB,delete".to_vec();

        assert!(matches!(
            runtime.submit_batches(list),
            Err(SubmitError::Rejected(_))
        ));
        assert!(matches!(
            runtime.submit_batches(BatchList::default()),
            Err(SubmitError::Rejected(KeyledgerError::InvalidBatch(_)))
        ));
    }

    #[tokio::test]
    async fn test_pending_until_executed() {
        let runtime = runtime();
        let kp = KeyPair::generate();

        let create = RecordPayload::create(key("farmA"), vec!["42".into()]).unwrap();
        let ids = runtime
            .submit_batches(batch_list(&kp, vec![tx(&kp, create)]))
            .unwrap();

        // No executor yet: the wait runs out and reports PENDING
        let statuses = runtime
            .wait_for_statuses(&ids, Duration::from_millis(50))
            .await;
        assert_eq!(statuses[0].status, BatchStatus::Pending);

        runtime.spawn_executor().unwrap();
        assert_eq!(settle(&runtime, &ids).await[0].status, BatchStatus::Committed);
        assert!(runtime.spawn_executor().is_err());
    }

    #[tokio::test]
    async fn test_unknown_and_full_queue() {
        let config = NodeConfig {
            max_queue: 1,
            ..NodeConfig::default()
        };
        let runtime = NodeRuntime::new(config, Arc::new(MemoryStateStore::new()));
        let kp = KeyPair::generate();

        let unknown = runtime.batch_statuses(&["feed".to_string()]);
        assert_eq!(unknown[0].status, BatchStatus::Unknown);

        let first = RecordPayload::create(key("a"), vec!["1".into()]).unwrap();
        let second = RecordPayload::create(key("b"), vec!["1".into()]).unwrap();
        runtime
            .submit_batches(batch_list(&kp, vec![tx(&kp, first)]))
            .unwrap();
        let second = batch_list(&kp, vec![tx(&kp, second)]);
        let second_id = second.batch_ids()[0].clone();
        assert!(matches!(runtime.submit_batches(second), Err(SubmitError::QueueFull)));
        assert_eq!(
            runtime.batch_statuses(&[second_id])[0].status,
            BatchStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_list_state_pages() {
        let runtime = runtime();
        runtime.spawn_executor().unwrap();
        let kp = KeyPair::generate();

        let transactions = ["a", "b", "c"]
            .iter()
            .map(|k| tx(&kp, RecordPayload::create(key(k), vec!["1".into()]).unwrap()))
            .collect();
        let ids = runtime.submit_batches(batch_list(&kp, transactions)).unwrap();
        settle(&runtime, &ids).await;

        let namespace = keyledger_records::family_namespace().to_string();
        let first = runtime.list_state(&namespace, None, 2).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        let next = first.next.clone().unwrap();

        let second = runtime.list_state(&namespace, Some(&next), 2).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(second.next.is_none());
        assert_eq!(second.entries[0].key, next.as_bytes());
    }

    /// Signed transaction for `payload` declaring `addresses` instead of its own
    fn redeclared(kp: &KeyPair, payload: RecordPayload, addresses: Vec<Address>) -> Transaction {
        let mut transaction = tx(kp, payload);
        let mut header = transaction.decode_header().unwrap();
        header.inputs = addresses.clone();
        header.outputs = addresses;
        transaction.header = header.signing_bytes().unwrap();
        transaction.header_signature = sign(kp, &transaction.header).to_hex();
        transaction
    }

    #[tokio::test]
    async fn test_extra_declared_address_invalid() {
        let runtime = runtime();
        runtime.spawn_executor().unwrap();
        let kp = KeyPair::generate();
        let own = record_address(&key("farmA")).unwrap();
        let other = record_address(&key("farmB")).unwrap();

        for addresses in [vec![own.clone(), other.clone()], vec![other.clone()]] {
            let create = RecordPayload::create(key("farmA"), vec!["42".into()]).unwrap();
            let transaction = redeclared(&kp, create, addresses);
            let ids = runtime
                .submit_batches(batch_list(&kp, vec![transaction]))
                .unwrap();

            let statuses = settle(&runtime, &ids).await;
            assert_eq!(statuses[0].status, BatchStatus::Invalid);
            assert!(statuses[0].invalid_transactions[0]
                .message
                .contains("must declare exactly"));
        }

        assert_eq!(runtime.get_state(&own).await.unwrap(), None);
        assert_eq!(runtime.get_state(&other).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_submission_queued_once() {
        let runtime = runtime();
        let kp = KeyPair::generate();

        let create = RecordPayload::create(key("farmA"), vec!["42".into()]).unwrap();
        let list = batch_list(&kp, vec![tx(&kp, create)]);
        let first = runtime.submit_batches(list.clone()).unwrap();
        let second = runtime.submit_batches(list).unwrap();
        assert_eq!(first, second);

        let mut receiver = runtime.receiver.lock().take().unwrap();
        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short("0123456789abcdef0123"), "0123456789abcdef");
        assert_eq!(short("abc"), "abc");
        assert_eq!(short("ééééééééé"), "éééééééé");
        assert_eq!(short("aaaaaaaaaaaaaaaé"), "aaaaaaaaaaaaaaaé");
    }
}
