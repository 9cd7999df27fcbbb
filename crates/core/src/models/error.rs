//! Error types for model loading and inference.

use thiserror::Error;

use crate::retry::Retryable;

use super::key::ModelKey;

/// Errors from acquiring or using a model handle.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Weights could not be resolved or the model could not be loaded.
    #[error("Model {key} unavailable: {reason}")]
    Unavailable { key: ModelKey, reason: String },

    /// The model behaves differently from what the pipeline relies on.
    #[error("Model {key} violated its contract: {reason}")]
    ContractViolation { key: ModelKey, reason: String },
}

impl ModelError {
    pub fn unavailable(key: &ModelKey, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    pub fn contract_violation(key: &ModelKey, reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            key: key.clone(),
            reason: reason.into(),
        }
    }
}

/// Errors from a single inference call.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    /// Temporary failure (backend busy, timeout); worth retrying.
    #[error("Transient inference failure: {0}")]
    Transient(String),

    /// The model refused this particular input.
    #[error("Model rejected input: {0}")]
    Rejected(String),

    /// The inference backend is broken.
    #[error("Inference backend failed: {0}")]
    Backend(String),
}

impl Retryable for InferenceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
