//! Error types for KEYLEDGER

use thiserror::Error;

/// Main error type for KEYLEDGER
#[derive(Error, Debug)]
pub enum KeyledgerError {
    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    Config(String),

    // ============ Cryptography Errors ============
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("A signing key is required to submit transactions")]
    SigningKeyRequired,

    // ============ Payload / State Encoding Errors ============
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Corrupt state at {address}: {reason}")]
    CorruptState { address: String, reason: String },

    // ============ Record Rules ============
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    // ============ Transaction Errors ============
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Address {address} is not declared as a transaction {access}")]
    UnauthorizedAddress { address: String, access: &'static str },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // ============ Storage Errors ============
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeyledgerError {
    /// Errors that reject a transaction rather than signal a broken node
    pub fn is_invalid_transaction(&self) -> bool {
        matches!(
            self,
            KeyledgerError::InvalidPayload(_)
                | KeyledgerError::CorruptState { .. }
                | KeyledgerError::AlreadyExists(_)
                | KeyledgerError::NotFound(_)
                | KeyledgerError::InvalidTransaction(_)
                | KeyledgerError::InvalidBatch(_)
                | KeyledgerError::InvalidSignature
                | KeyledgerError::InvalidPublicKey
                | KeyledgerError::UnauthorizedAddress { .. }
                | KeyledgerError::InvalidAddress(_)
        )
    }
}

impl From<std::io::Error> for KeyledgerError {
    fn from(err: std::io::Error) -> Self {
        KeyledgerError::StorageError(err.to_string())
    }
}

impl From<bincode::Error> for KeyledgerError {
    fn from(err: bincode::Error) -> Self {
        KeyledgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for KeyledgerError {
    fn from(err: serde_json::Error) -> Self {
        KeyledgerError::Serialization(err.to_string())
    }
}
