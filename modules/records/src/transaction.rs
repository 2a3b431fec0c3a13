//! Signed transaction and batch envelopes
//!
//! Headers are bincode-encoded and the encoded bytes travel inside the
//! envelope, so a verifier checks the signature against exactly the bytes
//! the signer produced. The transaction (or batch) id is its header
//! signature in hex.

use keyledger_core::{
    Address, KeyledgerError, KeyledgerResult, Signable, Timestamp, FAMILY_NAME, FAMILY_VERSION,
};
use keyledger_crypto::hashing::sha512_hex;
use keyledger_crypto::keys::KeyPair;
use keyledger_crypto::signing::sign;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::address::record_address;
use crate::payload::RecordPayload;

static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique per call, even for two calls within the same clock tick
fn next_nonce() -> String {
    let sequence = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", Timestamp::now().as_nanos(), sequence)
}

/// Transaction header; its bincode encoding is what gets signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub signer_public_key: String,
    pub family_name: String,
    pub family_version: String,
    pub inputs: Vec<Address>,
    pub outputs: Vec<Address>,
    pub dependencies: Vec<String>,
    pub payload_sha512: String,
    pub batcher_public_key: String,
    pub nonce: String,
}

impl TransactionHeader {
    pub fn from_bytes(bytes: &[u8]) -> KeyledgerResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| KeyledgerError::InvalidTransaction(format!("malformed header: {}", e)))
    }
}

impl Signable for TransactionHeader {
    fn signing_bytes(&self) -> KeyledgerResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// Signed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub header: Vec<u8>,
    pub header_signature: String,
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.header_signature
    }

    pub fn decode_header(&self) -> KeyledgerResult<TransactionHeader> {
        TransactionHeader::from_bytes(&self.header)
    }
}

/// Batch header; its bincode encoding is what gets signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub signer_public_key: String,
    pub transaction_ids: Vec<String>,
}

impl BatchHeader {
    pub fn from_bytes(bytes: &[u8]) -> KeyledgerResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| KeyledgerError::InvalidBatch(format!("malformed header: {}", e)))
    }
}

impl Signable for BatchHeader {
    fn signing_bytes(&self) -> KeyledgerResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// Signed batch of transactions, applied all-or-nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub header: Vec<u8>,
    pub header_signature: String,
    pub transactions: Vec<Transaction>,
}

impl Batch {
    pub fn id(&self) -> &str {
        &self.header_signature
    }

    pub fn decode_header(&self) -> KeyledgerResult<BatchHeader> {
        BatchHeader::from_bytes(&self.header)
    }
}

/// Body of a batch submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchList {
    pub batches: Vec<Batch>,
}

impl BatchList {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }

    pub fn batch_ids(&self) -> Vec<String> {
        self.batches.iter().map(|b| b.id().to_string()).collect()
    }

    pub fn to_bytes(&self) -> KeyledgerResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> KeyledgerResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| KeyledgerError::InvalidBatch(format!("malformed batch list: {}", e)))
    }
}

/// Builds signed transactions and batches for the record family
///
/// A builder without a signer can be constructed (read-only clients hold
/// one) but every build call fails with `SigningKeyRequired`.
pub struct TransactionBuilder<'a> {
    signer: Option<&'a KeyPair>,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(signer: Option<&'a KeyPair>) -> Self {
        Self { signer }
    }

    fn signer(&self) -> KeyledgerResult<&'a KeyPair> {
        self.signer.ok_or(KeyledgerError::SigningKeyRequired)
    }

    /// Sign a transaction whose only input and output is the payload key's address
    pub fn build_transaction(&self, payload: &RecordPayload) -> KeyledgerResult<Transaction> {
        let signer = self.signer()?;
        let public_key = signer.public_key().to_hex();
        let address = record_address(payload.key())?;
        let payload_bytes = payload.to_bytes();

        let header = TransactionHeader {
            signer_public_key: public_key.clone(),
            family_name: FAMILY_NAME.to_string(),
            family_version: FAMILY_VERSION.to_string(),
            inputs: vec![address.clone()],
            outputs: vec![address],
            dependencies: Vec::new(),
            payload_sha512: sha512_hex(&payload_bytes),
            batcher_public_key: public_key,
            nonce: next_nonce(),
        };

        let header_bytes = header.signing_bytes()?;
        let signature = sign(signer, &header_bytes);

        Ok(Transaction {
            header: header_bytes,
            header_signature: signature.to_hex(),
            payload: payload_bytes,
        })
    }

    /// Sign a batch over `transactions`, keeping their order
    pub fn build_batch(&self, transactions: Vec<Transaction>) -> KeyledgerResult<Batch> {
        let signer = self.signer()?;
        if transactions.is_empty() {
            return Err(KeyledgerError::InvalidBatch("batch has no transactions".into()));
        }

        let header = BatchHeader {
            signer_public_key: signer.public_key().to_hex(),
            transaction_ids: transactions.iter().map(|t| t.id().to_string()).collect(),
        };

        let header_bytes = header.signing_bytes()?;
        let signature = sign(signer, &header_bytes);

        debug!(
            "Built batch {} with {} transaction(s)",
            &signature.to_hex()[..16],
            transactions.len()
        );

        Ok(Batch {
            header: header_bytes,
            header_signature: signature.to_hex(),
            transactions,
        })
    }

    /// One payload, one transaction, one batch
    pub fn build_batch_list(&self, payload: &RecordPayload) -> KeyledgerResult<BatchList> {
        let transaction = self.build_transaction(payload)?;
        let batch = self.build_batch(vec![transaction])?;
        Ok(BatchList::new(vec![batch]))
    }
}
