//! Frame extraction: decode a source video and sample it at a fixed rate.

mod config;
mod decoder;
mod error;
mod ffmpeg;
mod sampler;
mod types;

pub use config::MediaConfig;
pub use decoder::{DecodedStream, VideoDecoder};
pub use error::ExtractError;
pub use ffmpeg::FfmpegDecoder;
pub use sampler::{ExtractOptions, FrameExtractor, FrameStream};
pub use types::{DecodedFrame, FrameRecord, FrameTag, VideoInfo, VideoRef};
