//! REST client for a KEYLEDGER state service

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use keyledger_core::{
    Action, Address, BatchStatus, ClientConfig, KeyledgerError, Record, RecordKey,
};
use keyledger_crypto::keys::KeyPair;
use keyledger_records::{
    family_namespace, record_address, BatchList, RecordPayload, RecordSet, TransactionBuilder,
};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::StateCache;
use crate::error::ClientError;
use crate::keyfile::load_key_file;

/// Header signature of a submitted batch
pub type BatchId = String;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Longest `wait` asked of the service in a single status request
const MAX_STATUS_WAIT: Duration = Duration::from_secs(300);

/// Stand-in deadline for timeouts too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Result of a create, update or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    /// Reasons reported for an INVALID batch
    pub messages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    link: String,
}

#[derive(Debug, Deserialize)]
struct InvalidTransaction {
    id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusEntry {
    id: String,
    status: BatchStatus,
    #[serde(default)]
    invalid_transactions: Vec<InvalidTransaction>,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct StateListEntry {
    address: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StateListResponse {
    data: Vec<StateListEntry>,
    #[serde(default)]
    paging: Paging,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Client for the record family
///
/// A client built without a key pair can read but every write fails with
/// `SigningKeyRequired`.
pub struct LedgerClient {
    base_url: String,
    http: Client,
    auth: Option<(String, String)>,
    signer: Option<KeyPair>,
    cache: StateCache,
    request_timeout: Duration,
    poll_interval: Duration,
}

impl LedgerClient {
    /// Build a client, loading the key file named by `config` if any
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let signer = match &config.key_file {
            Some(path) => Some(load_key_file(path)?),
            None => None,
        };
        Self::with_signer(config, signer)
    }

    /// Build a client around an already loaded key pair
    pub fn with_signer(config: &ClientConfig, signer: Option<KeyPair>) -> Result<Self, ClientError> {
        let base_url = config.base_url()?;
        let request_timeout = Duration::from_secs(config.request_timeout.max(1));
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::protocol("build http client", e))?;

        let auth = config.auth_user.clone().map(|user| {
            (user, config.auth_password.clone().unwrap_or_default())
        });

        match &signer {
            Some(kp) => debug!("Client for {} signing as {}", base_url, kp.public_key().to_hex()),
            None => debug!("Read-only client for {}", base_url),
        }

        Ok(Self {
            base_url,
            http,
            auth,
            signer,
            cache: StateCache::new(Duration::from_secs(config.cache_ttl)),
            request_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Pause between status polls that return immediately
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn signer(&self) -> Option<&KeyPair> {
        self.signer.as_ref()
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    /// Send a request and turn non-success statuses into errors
    async fn send(&self, url: &str, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder.send().await.map_err(|source| ClientError::Connection {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(url.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    body
                }
            });
        Err(ClientError::Service {
            status: status.as_u16(),
            reason,
        })
    }

    /// POST a batch list; returns the id of its first batch
    pub async fn submit(&self, batch_list: &BatchList) -> Result<BatchId, ClientError> {
        let batch_id = batch_list
            .batch_ids()
            .into_iter()
            .next()
            .ok_or_else(|| KeyledgerError::InvalidBatch("batch list is empty".into()))?;
        let body = batch_list.to_bytes()?;

        let url = self.url("/batches");
        let builder = self
            .request(Method::POST, &url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body);

        // The service may apply the batch even if the response never arrives
        for batch in &batch_list.batches {
            for transaction in &batch.transactions {
                if let Ok(header) = transaction.decode_header() {
                    self.cache.invalidate(&header.outputs);
                }
            }
        }

        let response = self.send(&url, builder).await?;

        let accepted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ClientError::protocol("submit", e))?;
        info!("Submitted batch {} ({})", short(&batch_id), accepted.link);

        Ok(batch_id)
    }

    async fn fetch_status(&self, batch_id: &str, wait: Duration) -> Result<StatusEntry, ClientError> {
        let wait = wait.min(MAX_STATUS_WAIT);
        let url = self.url(&format!(
            "/batch_statuses?id={}&wait={}",
            batch_id,
            wait.as_secs()
        ));
        let builder = self
            .request(Method::GET, &url)
            .timeout(wait + self.request_timeout);
        let response = self.send(&url, builder).await?;

        let body: DataResponse<Vec<StatusEntry>> = response
            .json()
            .await
            .map_err(|e| ClientError::protocol("batch status", e))?;
        body.data
            .into_iter()
            .find(|entry| entry.id == batch_id)
            .ok_or_else(|| ClientError::protocol("batch status", format!("no status for {}", batch_id)))
    }

    /// Poll until the batch leaves PENDING or `timeout` runs out
    ///
    /// A zero timeout returns PENDING without asking the service. The first
    /// failed fetch is an error; later failures fall back to the last status
    /// seen.
    pub async fn await_commit(
        &self,
        batch_id: &str,
        timeout: Duration,
    ) -> Result<BatchStatus, ClientError> {
        Ok(self.poll_commit(batch_id, timeout).await?.0)
    }

    async fn poll_commit(
        &self,
        batch_id: &str,
        timeout: Duration,
    ) -> Result<(BatchStatus, Vec<String>), ClientError> {
        if timeout.is_zero() {
            return Ok((BatchStatus::Pending, Vec::new()));
        }

        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let mut last: Option<BatchStatus> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.fetch_status(batch_id, remaining).await {
                Ok(entry) if entry.status != BatchStatus::Pending => {
                    debug!("Batch {} is {}", short(batch_id), entry.status);
                    let messages = entry
                        .invalid_transactions
                        .into_iter()
                        .map(|tx| {
                            warn!("Transaction {} invalid: {}", short(&tx.id), tx.message);
                            tx.message
                        })
                        .collect();
                    return Ok((entry.status, messages));
                }
                Ok(entry) => last = Some(entry.status),
                Err(e) => match last {
                    None => return Err(e),
                    Some(status) => {
                        warn!("Status poll for {} failed: {}", short(batch_id), e);
                        return Ok((status, Vec::new()));
                    }
                },
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok((last.unwrap_or(BatchStatus::Pending), Vec::new()));
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    async fn submit_action(
        &self,
        key: &str,
        action: Action,
        fields: &[String],
        wait: Duration,
    ) -> Result<SubmitOutcome, ClientError> {
        let payload = RecordPayload::new(RecordKey::new(key)?, action, fields.to_vec())?;
        let batch_list = TransactionBuilder::new(self.signer.as_ref()).build_batch_list(&payload)?;

        let batch_id = self.submit(&batch_list).await?;
        let (status, messages) = self.poll_commit(&batch_id, wait).await?;

        Ok(SubmitOutcome {
            batch_id,
            status,
            messages,
        })
    }

    /// Create a record; fields follow `RECORD_FIELDS`
    pub async fn create(
        &self,
        key: &str,
        fields: &[String],
        wait: Duration,
    ) -> Result<SubmitOutcome, ClientError> {
        self.submit_action(key, Action::Create, fields, wait).await
    }

    /// Replace the fields of an existing record
    pub async fn update(
        &self,
        key: &str,
        fields: &[String],
        wait: Duration,
    ) -> Result<SubmitOutcome, ClientError> {
        self.submit_action(key, Action::Update, fields, wait).await
    }

    pub async fn delete(&self, key: &str, wait: Duration) -> Result<SubmitOutcome, ClientError> {
        self.submit_action(key, Action::Delete, &[], wait).await
    }

    /// Blob stored at `address`, `None` if the address is empty
    async fn fetch_state(&self, address: &Address) -> Result<Option<Vec<u8>>, ClientError> {
        let url = self.url(&format!("/state/{}", address));
        let response = match self.send(&url, self.request(Method::GET, &url)).await {
            Ok(response) => response,
            Err(ClientError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let body: DataResponse<String> = response
            .json()
            .await
            .map_err(|e| ClientError::protocol("get state", e))?;
        let blob = BASE64
            .decode(body.data)
            .map_err(|e| ClientError::protocol("get state", e))?;
        Ok(Some(blob))
    }

    /// Look up one record by key
    pub async fn get_record(&self, key: &str) -> Result<Option<Record>, ClientError> {
        let key = RecordKey::new(key)?;
        let address = record_address(&key)?;

        let blob = match self.cache.get(&address) {
            Some(blob) => blob,
            None => {
                let blob = self.fetch_state(&address).await?;
                self.cache.insert(address.clone(), blob.clone());
                blob
            }
        };

        match blob {
            Some(bytes) => {
                let records = RecordSet::deserialize(&bytes).map_err(|e| e.at(&address))?;
                Ok(records.get(&key))
            }
            None => Ok(None),
        }
    }

    /// Every record in the family namespace
    ///
    /// Pages are fetched up front; records are decoded as the iterator is
    /// advanced.
    pub async fn list_all(&self) -> Result<RecordIter, ClientError> {
        let mut entries = Vec::new();
        let mut url = self.url(&format!("/state?address={}", family_namespace()));

        loop {
            let response = self.send(&url, self.request(Method::GET, &url)).await?;
            let page: StateListResponse = response
                .json()
                .await
                .map_err(|e| ClientError::protocol("list state", e))?;
            entries.extend(page.data);

            match page.paging.next {
                Some(next) => {
                    let next = self.url(&next);
                    if next == url {
                        return Err(ClientError::protocol("list state", "paging link loops"));
                    }
                    url = next;
                }
                None => break,
            }
        }

        debug!("Listed {} state entries", entries.len());
        Ok(RecordIter::new(entries))
    }
}

/// Lazy iterator over listed records
pub struct RecordIter {
    entries: std::vec::IntoIter<StateListEntry>,
    current: std::vec::IntoIter<Record>,
}

impl RecordIter {
    fn new(entries: Vec<StateListEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
            current: Vec::new().into_iter(),
        }
    }

    fn decode(entry: StateListEntry) -> Result<Vec<Record>, ClientError> {
        let address = Address::from_hex(&entry.address)?;
        let blob = BASE64
            .decode(entry.data)
            .map_err(|e| ClientError::protocol("list state", e))?;
        RecordSet::deserialize_entries(&blob).map_err(|e| e.at(&address).into())
    }
}

impl Iterator for RecordIter {
    type Item = Result<Record, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.current.next() {
                return Some(Ok(record));
            }
            match Self::decode(self.entries.next()?) {
                Ok(records) => self.current = records.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..16).unwrap_or(id)
}
