//! Error types for the storage module.

use thiserror::Error;

use crate::retry::Retryable;

/// Errors that can occur while talking to object storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object does not exist.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// A failure that may go away on retry (timeouts, throttling, 5xx).
    #[error("Transient storage failure: {reason}")]
    Transient { reason: String },

    /// A failure that will not go away on retry.
    #[error("Storage operation failed: {reason}")]
    Failed { reason: String },

    /// Transient failures persisted past the retry budget.
    #[error("Giving up on {key} after {attempts} attempts: {reason}")]
    RetriesExhausted {
        key: String,
        attempts: u32,
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Creates a transient error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Creates a permanent error.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
