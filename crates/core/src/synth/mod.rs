//! Avatar synthesis and video encoding.

mod encoder;
mod synthesizer;

pub use encoder::{check_frames, EncodeError, FfmpegEncoder, VideoEncoder};
pub use synthesizer::{
    enforce_temporal_bound, frame_delta, job_seed, AvatarSynthesizer, AvatarVideo,
    SynthesisConfig, SynthesisError, SynthesisInput,
};
