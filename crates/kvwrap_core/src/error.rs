//! Error types for database operations.
//!
//! Native backend operations and the fallback layer report through the same
//! [`DbError`] taxonomy, so callers cannot tell which path served a request.

use std::io;
use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The key is absent.
    #[error("record not found")]
    NotFound,

    /// A non-blocking lock attempt found the record locked by someone else.
    #[error("record is locked by another holder")]
    WouldBlock,

    /// An `Insert` store found the key already holding a value.
    #[error("record already exists")]
    AlreadyExists,

    /// The record was already deleted through this guard.
    #[error("record already deleted")]
    AlreadyDeleted,

    /// Operation not permitted in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Commit found that data read by the transaction changed underneath it.
    ///
    /// The whole transaction has been discarded and must be retried by the caller.
    #[error("transaction conflict on key {}", display_key(key))]
    TransactionConflict {
        /// The key whose committed state changed.
        key: Vec<u8>,
    },

    /// Backend storage fault.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backend storage holds data it cannot interpret.
    #[error("storage corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The backend does not offer this operation.
    #[error("operation not supported by backend: {operation}")]
    Unsupported {
        /// Name of the missing operation.
        operation: &'static str,
    },

    /// A stored value does not have the shape the caller asked for.
    #[error("invalid value: {message}")]
    InvalidValue {
        /// Description of the mismatch.
        message: String,
    },
}

impl DbError {
    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a transaction conflict error.
    pub fn conflict(key: impl Into<Vec<u8>>) -> Self {
        Self::TransactionConflict { key: key.into() }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Returns true for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

fn display_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(text) => format!("{text:?}"),
        Err(_) => key.iter().map(|b| format!("{b:02x}")).collect(),
    }
}
