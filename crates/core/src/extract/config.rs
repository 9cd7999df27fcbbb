//! Configuration for the ffmpeg-based media tools.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Paths and limits for ffmpeg/ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Scratch directory for encoded output.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Timeout for probing a source in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Maximum wait for the next decoded frame in seconds.
    #[serde(default = "default_read_timeout")]
    pub frame_read_timeout_secs: u64,

    /// Timeout for encoding an avatar video in seconds.
    #[serde(default = "default_encode_timeout")]
    pub encode_timeout_secs: u64,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_log_level")]
    pub ffmpeg_log_level: String,

    /// Output codec for avatar videos.
    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    /// Constant rate factor for the output codec.
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Additional global ffmpeg arguments.
    #[serde(default)]
    pub extra_ffmpeg_args: Vec<String>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("avatar-prep")
}

fn default_probe_timeout() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    120
}

fn default_encode_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    "error".to_string()
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_crf() -> u8 {
    18
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            temp_dir: default_temp_dir(),
            probe_timeout_secs: default_probe_timeout(),
            frame_read_timeout_secs: default_read_timeout(),
            encode_timeout_secs: default_encode_timeout(),
            ffmpeg_log_level: default_log_level(),
            video_codec: default_video_codec(),
            crf: default_crf(),
            extra_ffmpeg_args: Vec::new(),
        }
    }
}

impl MediaConfig {
    /// Sets the ffmpeg path.
    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Sets the ffprobe path.
    pub fn with_ffprobe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe_path = path.into();
        self
    }

    /// Sets the temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }
}
