//! Core types for KEYLEDGER
//!
//! Defines fundamental data structures shared by the client and the handler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyledgerError;
use crate::traits::KeyledgerResult;

/// Separator between records in a stored blob
pub const RECORD_SEPARATOR: char = '|';

/// Separator between fields in a payload or a stored record
pub const FIELD_SEPARATOR: char = ',';

/// Hex length of a namespace prefix
pub const NAMESPACE_LENGTH: usize = 6;

/// Hex length of a full state address
pub const ADDRESS_LENGTH: usize = 70;

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// 6-hex-character prefix owned by one transaction family
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Namespace made of the leading bytes of a digest
    pub fn from_digest(digest: &[u8]) -> Self {
        let prefix: Vec<u8> = digest.iter().copied().take(NAMESPACE_LENGTH / 2).collect();
        Namespace(hex::encode(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.0)
    }
}

/// 70-hex-character state address: namespace followed by 64 hex chars of key digest
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Join a namespace with a digest; only the first 64 hex chars of the digest are kept
    pub fn from_parts(namespace: &Namespace, digest_hex: &str) -> KeyledgerResult<Self> {
        let suffix_len = ADDRESS_LENGTH - NAMESPACE_LENGTH;
        if digest_hex.len() < suffix_len {
            return Err(KeyledgerError::InvalidAddress(format!(
                "digest too short for address: {} chars",
                digest_hex.len()
            )));
        }
        Self::from_hex(&format!("{}{}", namespace.as_str(), &digest_hex[..suffix_len]))
    }

    pub fn from_hex(s: &str) -> KeyledgerResult<Self> {
        if s.len() != ADDRESS_LENGTH || !is_lower_hex(s) {
            return Err(KeyledgerError::InvalidAddress(format!(
                "address must be {} lowercase hex characters: {:?}",
                ADDRESS_LENGTH, s
            )));
        }
        Ok(Address(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace part of this address
    pub fn namespace(&self) -> Namespace {
        Namespace(self.0[..NAMESPACE_LENGTH].to_string())
    }

    pub fn is_in(&self, namespace: &Namespace) -> bool {
        self.0.starts_with(namespace.as_str())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

/// Name of one logical record
///
/// Never empty and never contains either separator, so it survives both the
/// payload and the stored blob encodings unchanged.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> KeyledgerResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(KeyledgerError::InvalidPayload("key is required".into()));
        }
        if key.contains(RECORD_SEPARATOR) {
            return Err(KeyledgerError::InvalidPayload(format!(
                "key cannot contain '{}': {}",
                RECORD_SEPARATOR, key
            )));
        }
        if key.contains(FIELD_SEPARATOR) {
            return Err(KeyledgerError::InvalidPayload(format!(
                "key cannot contain '{}': {}",
                FIELD_SEPARATOR, key
            )));
        }
        Ok(RecordKey(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordKey {
    type Error = KeyledgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RecordKey::new(value)
    }
}

impl From<RecordKey> for String {
    fn from(key: RecordKey) -> Self {
        key.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({:?})", self.0)
    }
}

/// One logical record: its key and its business fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub fields: Vec<String>,
}

impl Record {
    pub fn new(key: RecordKey, fields: Vec<String>) -> Self {
        Self { key, fields }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        for field in &self.fields {
            write!(f, "{}{}", FIELD_SEPARATOR, field)?;
        }
        Ok(())
    }
}

/// Record mutation carried by a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Whether the payload carries the business fields after `key,action`
    pub fn carries_fields(&self) -> bool {
        match self {
            Action::Create | Action::Update => true,
            Action::Delete => false,
        }
    }
}

impl FromStr for Action {
    type Err = KeyledgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "" => Err(KeyledgerError::InvalidPayload("action is required".into())),
            other => Err(KeyledgerError::InvalidPayload(format!(
                "invalid action: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a submitted batch as reported by the state service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Pending,
    Committed,
    Invalid,
    Unknown,
}

impl BatchStatus {
    /// COMMITTED and INVALID never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Committed | BatchStatus::Invalid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Committed => "COMMITTED",
            BatchStatus::Invalid => "INVALID",
            BatchStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 32-byte public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> KeyledgerResult<Self> {
        let bytes = hex::decode(s).map_err(|_| KeyledgerError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyledgerError::InvalidPublicKey)?;
        Ok(PublicKey(arr))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", self.to_hex())
    }
}

/// 64-byte signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> KeyledgerResult<Self> {
        let bytes = hex::decode(s).map_err(|_| KeyledgerError::InvalidSignature)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| KeyledgerError::InvalidSignature)?;
        Ok(Signature(arr))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{}...)", &self.to_hex()[..16])
    }
}

/// Timestamp in nanoseconds since Unix epoch
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
        Timestamp(nanos.max(0) as u64)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Count of batches applied to a state store
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct StateVersion(pub u64);

impl StateVersion {
    pub fn new(value: u64) -> Self {
        StateVersion(value)
    }

    pub fn next(&self) -> StateVersion {
        StateVersion(self.0 + 1)
    }
}

impl fmt::Display for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Debug for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateVersion({})", self.0)
    }
}
