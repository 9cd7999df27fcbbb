//! FFmpeg-based video decoder.
//!
//! `ffprobe` reports duration, dimensions and frame rate; `ffmpeg` then
//! decodes to raw RGB24 on stdout, one `width * height * 3` chunk per frame.

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::config::MediaConfig;
use super::decoder::{DecodedStream, VideoDecoder};
use super::error::ExtractError;
use super::types::{DecodedFrame, VideoInfo, VideoRef};

/// Keep at most this much ffmpeg stderr for error messages.
const STDERR_LIMIT: usize = 8 * 1024;

/// Decoder that shells out to ffprobe/ffmpeg.
pub struct FfmpegDecoder {
    config: MediaConfig,
}

impl FfmpegDecoder {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Creates a decoder with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MediaConfig::default())
    }

    /// Probes `input` with ffprobe.
    pub async fn probe(&self, input: &str) -> Result<VideoInfo, ExtractError> {
        let output = timeout(
            Duration::from_secs(self.config.probe_timeout_secs),
            Command::new(&self.config.ffprobe_path)
                .args([
                    "-v",
                    "error",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                    input,
                ])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExtractError::Timeout {
            timeout_secs: self.config.probe_timeout_secs,
        })?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractError::ToolNotFound {
                    tool: "ffprobe",
                    path: self.config.ffprobe_path.clone(),
                }
            } else {
                ExtractError::Io(e)
            }
        })?;

        if !output.status.success() {
            return Err(ExtractError::corrupt(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Self::parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Parses ffprobe JSON output into VideoInfo.
    fn parse_probe_output(output: &str) -> Result<VideoInfo, ExtractError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: Option<ProbeFormat>,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            duration: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            width: Option<u32>,
            height: Option<u32>,
            duration: Option<String>,
            avg_frame_rate: Option<String>,
            r_frame_rate: Option<String>,
        }

        let probe: ProbeOutput = serde_json::from_str(output)
            .map_err(|e| ExtractError::corrupt(format!("unreadable ffprobe output: {}", e)))?;

        let video = probe
            .streams
            .iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| ExtractError::corrupt("no video stream"))?;

        let (width, height) = match (video.width, video.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => return Err(ExtractError::corrupt("video stream has no dimensions")),
        };

        let duration_secs = video
            .duration
            .as_deref()
            .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| *d > 0.0)
            .ok_or_else(|| ExtractError::corrupt("container reports no duration"))?;

        let fps = [video.avg_frame_rate.as_deref(), video.r_frame_rate.as_deref()]
            .into_iter()
            .flatten()
            .find_map(parse_frame_rate)
            .ok_or_else(|| ExtractError::corrupt("video stream has no frame rate"))?;

        Ok(VideoInfo {
            duration_secs,
            width,
            height,
            fps,
        })
    }

    /// Output is resampled to a constant `fps`, so frame `n` sits at `n / fps`
    /// even when the source has a variable frame rate.
    fn decode_args(&self, input: &str, fps: f64) -> Vec<String> {
        let mut args = vec![
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-i".to_string(),
            input.to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-fps_mode".to_string(),
            "cfr".to_string(),
            "-r".to_string(),
            fps.to_string(),
        ];
        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push("pipe:1".to_string());
        args
    }
}

/// Parses a frame rate like "30000/1001" or "25".
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().ok()?;
            let den = den.parse::<f64>().ok()?;
            if den > 0.0 {
                num / den
            } else {
                return None;
            }
        }
        None => rate.parse::<f64>().ok()?,
    };
    (value > 0.0 && value.is_finite()).then_some(value)
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn open(&self, video: &VideoRef) -> Result<Box<dyn DecodedStream>, ExtractError> {
        let input = video.as_input();
        let info = self.probe(&input).await?;
        debug!(
            "Probed {}: {}x{} @ {:.3} fps, {:.2}s",
            video, info.width, info.height, info.fps, info.duration_secs
        );

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(self.decode_args(&input, info.fps))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::ToolNotFound {
                        tool: "ffmpeg",
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    ExtractError::Io(e)
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::corrupt("ffmpeg stdout not captured"))?;
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(drain(stderr)));

        Ok(Box::new(FfmpegFrameStream {
            frame_size: info.width as usize * info.height as usize * 3,
            info,
            child,
            stdout,
            stderr_task,
            read_timeout: Duration::from_secs(self.config.frame_read_timeout_secs),
            produced: 0,
            done: false,
        }))
    }
}

/// Collects the tail of a stream into a string.
async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut collected = Vec::new();
    let mut buf = [0u8; 1024];
    while let Ok(n) = reader.read(&mut buf).await {
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
        if collected.len() > STDERR_LIMIT {
            collected.drain(..collected.len() - STDERR_LIMIT);
        }
    }
    String::from_utf8_lossy(&collected).trim().to_string()
}

/// Fills `buf` completely. Returns `Ok(false)` on a clean EOF before any byte.
async fn read_frame(reader: &mut ChildStdout, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("truncated frame ({} of {} bytes)", filled, buf.len()),
            ));
        }
        filled += n;
    }
    Ok(true)
}

struct FfmpegFrameStream {
    info: VideoInfo,
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
    frame_size: usize,
    read_timeout: Duration,
    produced: u64,
    done: bool,
}

impl FfmpegFrameStream {
    async fn stderr_text(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Called once stdout is exhausted; reports a failing exit status.
    async fn finish(&mut self) -> Option<Result<DecodedFrame, ExtractError>> {
        self.done = true;
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(Err(ExtractError::Io(e))),
        };
        if status.success() {
            return None;
        }
        let stderr = self.stderr_text().await;
        Some(Err(ExtractError::corrupt(format!(
            "ffmpeg exited with {} after {} frames: {}",
            status, self.produced, stderr
        ))))
    }
}

#[async_trait]
impl DecodedStream for FfmpegFrameStream {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> Option<Result<DecodedFrame, ExtractError>> {
        if self.done {
            return None;
        }

        let mut buf = vec![0u8; self.frame_size];
        let read = timeout(self.read_timeout, read_frame(&mut self.stdout, &mut buf)).await;
        match read {
            Err(_) => {
                self.done = true;
                let _ = self.child.start_kill();
                Some(Err(ExtractError::Timeout {
                    timeout_secs: self.read_timeout.as_secs(),
                }))
            }
            Ok(Ok(false)) => self.finish().await,
            Ok(Err(e)) => {
                self.done = true;
                let _ = self.child.start_kill();
                let stderr = self.stderr_text().await;
                Some(Err(ExtractError::corrupt(format!("{}: {}", e, stderr))))
            }
            Ok(Ok(true)) => {
                let image = match RgbImage::from_raw(self.info.width, self.info.height, buf) {
                    Some(image) => image,
                    None => {
                        self.done = true;
                        return Some(Err(ExtractError::corrupt("frame buffer size mismatch")));
                    }
                };
                let pts_secs = self.produced as f64 / self.info.fps;
                self.produced += 1;
                Some(Ok(DecodedFrame {
                    pts_secs,
                    image: Arc::new(image),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let output = r#"{
            "streams": [
                {"codec_type": "audio", "duration": "10.5"},
                {"codec_type": "video", "width": 1280, "height": 720,
                 "avg_frame_rate": "0/0", "r_frame_rate": "30/1"}
            ],
            "format": {"duration": "10.000000"}
        }"#;
        let info = FfmpegDecoder::parse_probe_output(output).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.fps, 30.0);
        assert_eq!(info.duration_secs, 10.0);
    }

    #[test]
    fn test_probe_without_video_is_corrupt() {
        let output = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3"}}"#;
        let err = FfmpegDecoder::parse_probe_output(output).unwrap_err();
        assert!(err.is_media_error());
    }

    #[test]
    fn test_probe_without_duration_is_corrupt() {
        let output = r#"{"streams": [{"codec_type": "video", "width": 2, "height": 2,
            "r_frame_rate": "25/1"}], "format": {}}"#;
        assert!(FfmpegDecoder::parse_probe_output(output).is_err());
    }

    #[test]
    fn test_decode_args_pipe_raw_rgb() {
        let decoder = FfmpegDecoder::with_defaults();
        let args = decoder.decode_args("/in.mp4", 30.0);
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/in.mp4"]));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn test_decode_args_force_constant_rate() {
        let decoder = FfmpegDecoder::with_defaults();
        let args = decoder.decode_args("/phone.mov", 29.97);

        assert!(args.windows(2).any(|w| w == ["-fps_mode", "cfr"]));
        assert!(args.windows(2).any(|w| w == ["-r", "29.97"]));
        assert!(!args.iter().any(|a| a == "passthrough"));

        let input = args.iter().position(|a| a == "-i").unwrap();
        let rate = args.iter().position(|a| a == "-r").unwrap();
        assert!(rate > input, "-r must be an output option");
    }

    #[tokio::test]
    async fn test_missing_ffprobe() {
        let decoder = FfmpegDecoder::new(
            MediaConfig::default().with_ffprobe_path("/nonexistent/ffprobe"),
        );
        let err = decoder
            .open(&VideoRef::Path("/tmp/x.mp4".into()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExtractError::ToolNotFound { tool: "ffprobe", .. }));
    }
}
