//! Frame extraction types.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::pipeline::JobId;

/// Where a source video lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoRef {
    /// Local file path.
    Path(PathBuf),
    /// Remote URL ffmpeg can read (http, https, s3 presigned...).
    Url(String),
}

impl VideoRef {
    /// The input argument handed to ffmpeg/ffprobe.
    pub fn as_input(&self) -> String {
        match self {
            Self::Path(p) => p.to_string_lossy().to_string(),
            Self::Url(u) => u.clone(),
        }
    }
}

impl fmt::Display for VideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Url(u) => write!(f, "{}", u),
        }
    }
}

/// Stream properties reported by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    /// Native frame rate.
    pub fps: f64,
}

impl VideoInfo {
    /// Number of sample instants `k / rate` strictly before the end of the video.
    pub fn expected_frames(&self, sample_rate_hz: f64) -> usize {
        if !(self.duration_secs > 0.0) || !(sample_rate_hz > 0.0) {
            return 0;
        }
        let exact = self.duration_secs * sample_rate_hz;
        let floor = exact.floor();
        // t_k < duration, so an exact multiple excludes its endpoint
        if (exact - floor).abs() < 1e-9 {
            floor as usize
        } else {
            floor as usize + 1
        }
    }
}

/// One frame as produced by a decoder.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Presentation timestamp in seconds.
    pub pts_secs: f64,
    pub image: Arc<RgbImage>,
}

/// Lifecycle tag of a sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameTag {
    Extracted,
    FaceFound,
    NoFace,
    Landmarked,
    LandmarkFailed,
    Masked,
    MaskFailed,
}

impl FrameTag {
    /// True if the frame was excluded from further processing.
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::NoFace | Self::LandmarkFailed | Self::MaskFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extracted => "extracted",
            Self::FaceFound => "face_found",
            Self::NoFace => "no_face",
            Self::Landmarked => "landmarked",
            Self::LandmarkFailed => "landmark_failed",
            Self::Masked => "masked",
            Self::MaskFailed => "mask_failed",
        }
    }
}

/// A sampled frame flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub job_id: JobId,
    pub index: usize,
    /// Requested sample time, `index / sample_rate`.
    pub timestamp_secs: f64,
    /// Timestamp of the decoded frame chosen for this sample.
    pub source_pts_secs: f64,
    pub image: Arc<RgbImage>,
    pub tag: FrameTag,
}

impl FrameRecord {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row-major RGB8 pixels.
    pub fn raw_bytes(&self) -> Vec<u8> {
        self.image.as_raw().clone()
    }

    /// Returns the record with a new lifecycle tag.
    pub fn tagged(mut self, tag: FrameTag) -> Self {
        self.tag = tag;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(duration_secs: f64) -> VideoInfo {
        VideoInfo {
            duration_secs,
            width: 64,
            height: 48,
            fps: 30.0,
        }
    }

    #[test]
    fn test_expected_frames() {
        assert_eq!(info(10.0).expected_frames(5.0), 50);
        assert_eq!(info(10.1).expected_frames(5.0), 51);
        assert_eq!(info(0.1).expected_frames(5.0), 1);
        assert_eq!(info(0.0).expected_frames(5.0), 0);
        assert_eq!(info(10.0).expected_frames(0.0), 0);
    }

    #[test]
    fn test_video_ref_serde() {
        let v: VideoRef = serde_json::from_str(r#"{"path": "/videos/a.mp4"}"#).unwrap();
        assert_eq!(v, VideoRef::Path(PathBuf::from("/videos/a.mp4")));
        let v: VideoRef = serde_json::from_str(r#"{"url": "https://x/a.mp4"}"#).unwrap();
        assert_eq!(v.as_input(), "https://x/a.mp4");
    }

    #[test]
    fn test_dropped_tags() {
        assert!(FrameTag::NoFace.is_dropped());
        assert!(FrameTag::MaskFailed.is_dropped());
        assert!(!FrameTag::Landmarked.is_dropped());
        assert_eq!(FrameTag::LandmarkFailed.as_str(), "landmark_failed");
    }
}
