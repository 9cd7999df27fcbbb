//! Orchestrator errors and job failure classification.

use thiserror::Error;
use tokio::task::JoinError;

use crate::detect::DetectionError;
use crate::extract::ExtractError;
use crate::models::{InferenceError, ModelError};
use crate::retry::RetryFailure;
use crate::storage::StorageError;
use crate::synth::SynthesisError;

use super::types::{ErrorKind, JobFailure, PipelineState, Stage};

/// Why a submission was refused by admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooManyJobs { in_flight: usize, limit: usize },
    QueueFull { depth: usize, limit: usize },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyJobs { in_flight, limit } => {
                write!(f, "{} jobs in flight (limit {})", in_flight, limit)
            }
            Self::QueueFull { depth, limit } => {
                write!(f, "{} frame tasks queued (limit {})", depth, limit)
            }
        }
    }
}

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The orchestrator is not accepting jobs.
    #[error("Orchestrator is not running")]
    NotRunning,

    /// Admission control refused the job; retry later.
    #[error("Job rejected: {0}")]
    Rejected(Rejection),

    /// A non-terminal job with this id exists.
    #[error("Job already exists: {0}")]
    JobExists(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("Invalid job configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

/// A job-level failure before the stage is attached.
#[derive(Debug, Clone)]
pub(crate) struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "job was cancelled")
    }

    pub fn at(self, stage: Stage) -> JobFailure {
        JobFailure {
            kind: self.kind,
            stage,
            message: self.message,
        }
    }
}

impl From<ModelError> for StageFailure {
    fn from(e: ModelError) -> Self {
        let kind = match e {
            ModelError::Unavailable { .. } => ErrorKind::ModelUnavailable,
            ModelError::ContractViolation { .. } => ErrorKind::ModelContractViolation,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<InferenceError> for StageFailure {
    fn from(e: InferenceError) -> Self {
        let kind = match e {
            InferenceError::Transient(_) => ErrorKind::TransientExhausted,
            InferenceError::Rejected(_) | InferenceError::Backend(_) => ErrorKind::Internal,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<ExtractError> for StageFailure {
    fn from(e: ExtractError) -> Self {
        let kind = if e.is_media_error() {
            ErrorKind::CorruptMedia
        } else {
            ErrorKind::Internal
        };
        Self::new(kind, e.to_string())
    }
}

impl From<DetectionError> for StageFailure {
    fn from(e: DetectionError) -> Self {
        match e {
            DetectionError::Inference(e) => e.into(),
            DetectionError::Model(e) => e.into(),
        }
    }
}

impl From<RetryFailure<DetectionError>> for StageFailure {
    fn from(failure: RetryFailure<DetectionError>) -> Self {
        let mut stage_failure = Self::from(failure.error);
        if failure.exhausted {
            stage_failure.kind = ErrorKind::TransientExhausted;
            stage_failure.message = format!(
                "{} (after {} attempts)",
                stage_failure.message, failure.attempts
            );
        }
        stage_failure
    }
}

impl From<SynthesisError> for StageFailure {
    fn from(e: SynthesisError) -> Self {
        let message = e.to_string();
        match e {
            SynthesisError::InsufficientFrames { .. } => {
                Self::new(ErrorKind::InsufficientFrames, message)
            }
            SynthesisError::Inference { source, .. } => Self {
                message,
                ..StageFailure::from(source)
            },
            SynthesisError::Model(e) => e.into(),
            SynthesisError::DimensionMismatch { .. } => {
                Self::new(ErrorKind::ModelContractViolation, message)
            }
            SynthesisError::Misaligned(_) | SynthesisError::Encode(_) => {
                Self::new(ErrorKind::Internal, message)
            }
        }
    }
}

impl From<StorageError> for StageFailure {
    fn from(e: StorageError) -> Self {
        Self::new(ErrorKind::StorageError, e.to_string())
    }
}

impl From<JoinError> for StageFailure {
    fn from(e: JoinError) -> Self {
        Self::new(ErrorKind::Internal, format!("frame task failed: {}", e))
    }
}
