//! Error types for frame extraction.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while decoding and sampling a video.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The source cannot be opened, probed or decoded.
    #[error("Corrupt or unreadable media: {reason}")]
    CorruptMedia { reason: String },

    /// A media tool binary is missing.
    #[error("{tool} not found at path: {path}")]
    ToolNotFound { tool: &'static str, path: PathBuf },

    /// The requested sampling rate is unusable.
    #[error("Invalid sample rate: {rate} Hz")]
    InvalidSampleRate { rate: f64 },

    /// The decoder stopped responding.
    #[error("Decoder timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Creates a corrupt media error.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptMedia {
            reason: reason.into(),
        }
    }

    /// Returns true if the error describes the media rather than the environment.
    pub fn is_media_error(&self) -> bool {
        matches!(self, Self::CorruptMedia { .. })
    }
}
