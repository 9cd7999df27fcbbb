//! Error types for detection stages.

use thiserror::Error;

use crate::models::{InferenceError, ModelError};
use crate::retry::Retryable;

/// Job-relevant failures of a detection call.
///
/// Per-frame misses (no face, low confidence) are not errors; detectors
/// report them as `Ok(None)`.
#[derive(Debug, Clone, Error)]
pub enum DetectionError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl Retryable for DetectionError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Inference(e) => e.is_retryable(),
            Self::Model(_) => false,
        }
    }
}
