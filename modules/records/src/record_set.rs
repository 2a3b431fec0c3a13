//! Packed record blobs stored at one address
//!
//! Records are written as `key,field...`, joined with `|` and sorted by key, so
//! an unchanged set always serializes to the same bytes.

use keyledger_core::{
    Address, KeyledgerError, Record, RecordKey, FIELD_SEPARATOR, RECORD_SEPARATOR,
};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::payload::RECORD_FIELDS;

/// Why a stored blob could not be decoded
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordSetDecodeError {
    #[error("state is not UTF-8")]
    NotUtf8,

    #[error("entry {entry:?} has {got} parts, expected {expected}")]
    Arity {
        entry: String,
        expected: usize,
        got: usize,
    },

    #[error("entry has invalid key: {0}")]
    InvalidKey(String),

    #[error("duplicate key in state: {0}")]
    DuplicateKey(String),
}

impl RecordSetDecodeError {
    /// Attach the address the blob was read from
    pub fn at(self, address: &Address) -> KeyledgerError {
        KeyledgerError::CorruptState {
            address: address.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Records sharing one state address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: BTreeMap<RecordKey, Vec<String>>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RecordKey) -> Option<Record> {
        self.records
            .get(key)
            .map(|fields| Record::new(key.clone(), fields.clone()))
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records.contains_key(key)
    }

    /// Insert or replace a record, returning the previous fields
    pub fn insert(&mut self, record: Record) -> Option<Vec<String>> {
        self.records.insert(record.key, record.fields)
    }

    pub fn remove(&mut self, key: &RecordKey) -> Option<Vec<String>> {
        self.records.remove(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let sep = FIELD_SEPARATOR.to_string();
        self.records
            .iter()
            .map(|(key, fields)| {
                let mut parts = Vec::with_capacity(1 + fields.len());
                parts.push(key.as_str());
                parts.extend(fields.iter().map(String::as_str));
                parts.join(&sep)
            })
            .collect::<Vec<_>>()
            .join(&RECORD_SEPARATOR.to_string())
            .into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, RecordSetDecodeError> {
        let mut set = RecordSet::new();
        for record in Self::deserialize_entries(bytes)? {
            let name = record.key.to_string();
            if set.insert(record).is_some() {
                return Err(RecordSetDecodeError::DuplicateKey(name));
            }
        }
        Ok(set)
    }

    /// Decode the records of a blob in the order they are stored
    pub fn deserialize_entries(bytes: &[u8]) -> Result<Vec<Record>, RecordSetDecodeError> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        let text = std::str::from_utf8(bytes).map_err(|_| RecordSetDecodeError::NotUtf8)?;
        let expected = 1 + RECORD_FIELDS.len();

        text.split(RECORD_SEPARATOR)
            .map(|entry| {
                let parts: Vec<&str> = entry.split(FIELD_SEPARATOR).collect();
                if parts.len() != expected {
                    return Err(RecordSetDecodeError::Arity {
                        entry: entry.to_string(),
                        expected,
                        got: parts.len(),
                    });
                }
                let key = RecordKey::new(parts[0])
                    .map_err(|_| RecordSetDecodeError::InvalidKey(parts[0].to_string()))?;
                let fields = parts[1..].iter().map(|s| s.to_string()).collect();
                Ok(Record::new(key, fields))
            })
            .collect()
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}
