//! Video decoder seam.

use async_trait::async_trait;

use super::error::ExtractError;
use super::types::{DecodedFrame, VideoInfo, VideoRef};

/// Opens videos for sequential decoding.
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    /// Opens and probes `video`.
    ///
    /// Fails with [`ExtractError::CorruptMedia`] if the container cannot be read.
    async fn open(&self, video: &VideoRef) -> Result<Box<dyn DecodedStream>, ExtractError>;
}

/// Frames of one opened video, in presentation order.
#[async_trait]
pub trait DecodedStream: Send {
    fn info(&self) -> &VideoInfo;

    /// Next decoded frame; `None` at the end of the stream.
    async fn next_frame(&mut self) -> Option<Result<DecodedFrame, ExtractError>>;
}
