//! Errors surfaced by the duty-status ledger.

use thiserror::Error;

use crate::types::ValidationError;

/// Errors from timeline mutation and status transitions.
///
/// Every variant aborts the operation before any write. None of them are
/// retried by the ledger itself.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// A referenced trip, log day or interval does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// The mutation would break a timeline or lifecycle invariant.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A timestamp was malformed or out of order with the timeline.
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    /// Some other input value was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn invalid_timestamp(value: impl ToString) -> Self {
        Self::InvalidTimestamp {
            value: value.to_string(),
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
