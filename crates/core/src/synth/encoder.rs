//! Avatar video encoding.

use async_trait::async_trait;
use image::RgbImage;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::extract::MediaConfig;

/// Errors from video encoding.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("No frames to encode")]
    NoFrames,

    #[error("Frame {index} is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Invalid output frame rate: {fps}")]
    InvalidFrameRate { fps: f64 },

    #[error("ffmpeg not found at path: {0}")]
    ToolNotFound(PathBuf),

    #[error("Encoding failed: {0}")]
    Failed(String),

    #[error("Encoding timed out after {0} seconds")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns an ordered frame sequence into a video file.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Encodes equally sized frames at `fps`, returning the container bytes.
    async fn encode(&self, frames: &[RgbImage], fps: f64) -> Result<Vec<u8>, EncodeError>;
}

/// Checks that `frames` is non-empty and uniformly sized.
pub fn check_frames(frames: &[RgbImage]) -> Result<(u32, u32), EncodeError> {
    let first = frames.first().ok_or(EncodeError::NoFrames)?;
    let expected = first.dimensions();
    for (index, frame) in frames.iter().enumerate() {
        if frame.dimensions() != expected {
            return Err(EncodeError::DimensionMismatch {
                index,
                expected,
                actual: frame.dimensions(),
            });
        }
    }
    Ok(expected)
}

/// H.264/MP4 encoder piping raw RGB24 frames into ffmpeg.
pub struct FfmpegEncoder {
    config: MediaConfig,
}

impl FfmpegEncoder {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, width: u32, height: u32, fps: f64, output: &str) -> Vec<String> {
        let mut args = vec![
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-y".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            format!("{}", fps),
            "-i".to_string(),
            "pipe:0".to_string(),
            // yuv420p needs even dimensions
            "-vf".to_string(),
            "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
            "-c:v".to_string(),
            self.config.video_codec.clone(),
            "-crf".to_string(),
            self.config.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ];
        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push(output.to_string());
        args
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(&self, frames: &[RgbImage], fps: f64) -> Result<Vec<u8>, EncodeError> {
        let (width, height) = check_frames(frames)?;
        if !(fps > 0.0 && fps.is_finite()) {
            return Err(EncodeError::InvalidFrameRate { fps });
        }

        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let output = self
            .config
            .temp_dir
            .join(format!("avatar-{}.mp4", uuid::Uuid::new_v4()));
        let output_str = output.to_string_lossy().to_string();

        debug!(
            "Encoding {} frames ({}x{} @ {} fps) to {}",
            frames.len(),
            width,
            height,
            fps,
            output_str
        );

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(self.build_args(width, height, fps, &output_str))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EncodeError::ToolNotFound(self.config.ffmpeg_path.clone())
                } else {
                    EncodeError::Io(e)
                }
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncodeError::Failed("ffmpeg stdin unavailable".to_string()))?;
        let feed = async move {
            for frame in frames {
                stdin.write_all(frame.as_raw()).await?;
            }
            stdin.shutdown().await
        };

        let result = timeout(
            Duration::from_secs(self.config.encode_timeout_secs),
            async { tokio::join!(feed, child.wait_with_output()) },
        )
        .await;

        let outcome = match result {
            Err(_) => Err(EncodeError::Timeout(self.config.encode_timeout_secs)),
            Ok((_, Err(e))) => Err(EncodeError::Io(e)),
            Ok((fed, Ok(out))) => {
                if !out.status.success() {
                    Err(EncodeError::Failed(
                        String::from_utf8_lossy(&out.stderr).trim().to_string(),
                    ))
                } else if let Err(e) = fed {
                    Err(EncodeError::Io(e))
                } else {
                    tokio::fs::read(&output).await.map_err(EncodeError::Io)
                }
            }
        };

        let _ = tokio::fs::remove_file(&output).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_frames() {
        assert!(matches!(check_frames(&[]), Err(EncodeError::NoFrames)));

        let frames = vec![RgbImage::new(4, 4), RgbImage::new(4, 2)];
        assert!(matches!(
            check_frames(&frames),
            Err(EncodeError::DimensionMismatch { index: 1, .. })
        ));

        assert_eq!(check_frames(&[RgbImage::new(3, 5)]).unwrap(), (3, 5));
    }

    #[test]
    fn test_build_args() {
        let encoder = FfmpegEncoder::new(MediaConfig::default());
        let args = encoder.build_args(641, 480, 5.0, "/tmp/out.mp4");

        assert!(args.windows(2).any(|w| w == ["-s", "641x480"]));
        assert!(args.windows(2).any(|w| w == ["-r", "5"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg() {
        let temp = tempfile::TempDir::new().unwrap();
        let encoder = FfmpegEncoder::new(
            MediaConfig::default()
                .with_ffmpeg_path("/nonexistent/ffmpeg")
                .with_temp_dir(temp.path()),
        );
        let err = encoder.encode(&[RgbImage::new(2, 2)], 5.0).await.unwrap_err();
        assert!(matches!(err, EncodeError::ToolNotFound(_)));
    }
}
