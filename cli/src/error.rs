//! Client errors

use keyledger_core::KeyledgerError;
use thiserror::Error;

/// Boxed cause of a protocol failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by `LedgerClient`
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service could not be reached
    #[error("cannot reach {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status
    #[error("service returned {status}: {reason}")]
    Service { status: u16, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// The service answered with something we could not interpret
    #[error("{operation}: unexpected response: {source}")]
    Protocol {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Keyledger(#[from] KeyledgerError),
}

impl ClientError {
    pub(crate) fn protocol(operation: &'static str, source: impl Into<BoxError>) -> Self {
        ClientError::Protocol {
            operation,
            source: source.into(),
        }
    }
}
