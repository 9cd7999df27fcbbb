//! Mock video decoder and encoder for testing.

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::extract::{DecodedFrame, DecodedStream, ExtractError, VideoDecoder, VideoInfo, VideoRef};
use crate::synth::{check_frames, EncodeError, VideoEncoder};

/// Fill value of synthetic frames.
const FILL: u8 = 128;

/// Builds a synthetic frame carrying `marker` in pixel (0, 0).
pub fn marked_frame(width: u32, height: u32, marker: u32) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, Rgb([FILL, FILL, FILL]));
    image.put_pixel(
        0,
        0,
        Rgb([(marker & 0xff) as u8, ((marker >> 8) & 0xff) as u8, 0]),
    );
    image
}

/// Reads the marker written by [`marked_frame`], i.e. the source frame number.
pub fn frame_marker(image: &RgbImage) -> u32 {
    let pixel = image.get_pixel(0, 0);
    pixel[0] as u32 | (pixel[1] as u32) << 8
}

/// Decoder producing `duration * fps` synthetic frames for any video.
///
/// Each frame is uniformly grey except for pixel (0, 0), which encodes the
/// source frame number (see [`frame_marker`]).
#[derive(Debug, Clone)]
pub struct MockVideoDecoder {
    duration_secs: f64,
    fps: f64,
    width: u32,
    height: u32,
    fail_open: bool,
    fail_after: Option<usize>,
}

impl MockVideoDecoder {
    pub fn new(duration_secs: f64, fps: f64) -> Self {
        Self {
            duration_secs,
            fps,
            width: 64,
            height: 48,
            fail_open: false,
            fail_after: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Every `open` fails as corrupt media.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Decoding fails after `frames` source frames.
    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

#[async_trait]
impl VideoDecoder for MockVideoDecoder {
    async fn open(&self, video: &VideoRef) -> Result<Box<dyn DecodedStream>, ExtractError> {
        if self.fail_open {
            return Err(ExtractError::corrupt(format!("cannot open {}", video)));
        }
        Ok(Box::new(MockDecodedStream {
            info: VideoInfo {
                duration_secs: self.duration_secs,
                width: self.width,
                height: self.height,
                fps: self.fps,
            },
            total: (self.duration_secs * self.fps).round() as usize,
            fail_after: self.fail_after,
            next: 0,
        }))
    }
}

struct MockDecodedStream {
    info: VideoInfo,
    total: usize,
    fail_after: Option<usize>,
    next: usize,
}

#[async_trait]
impl DecodedStream for MockDecodedStream {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> Option<Result<DecodedFrame, ExtractError>> {
        if self.fail_after == Some(self.next) {
            self.fail_after = None;
            self.total = self.next;
            return Some(Err(ExtractError::corrupt(format!(
                "invalid data at frame {}",
                self.next
            ))));
        }
        if self.next >= self.total {
            return None;
        }
        let frame = DecodedFrame {
            pts_secs: self.next as f64 / self.info.fps,
            image: Arc::new(marked_frame(self.info.width, self.info.height, self.next as u32)),
        };
        self.next += 1;
        Some(Ok(frame))
    }
}

/// Encoder that records the frames it was given instead of producing MP4.
#[derive(Debug, Default)]
pub struct MockVideoEncoder {
    encodes: RwLock<Vec<Vec<RgbImage>>>,
    next_error: RwLock<Option<EncodeError>>,
}

impl MockVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next encode fail with `error`.
    pub async fn fail_next(&self, error: EncodeError) {
        *self.next_error.write().await = Some(error);
    }

    /// Number of successful encodes.
    pub async fn encode_count(&self) -> usize {
        self.encodes.read().await.len()
    }

    /// Frames of the most recent encode.
    pub async fn last_frames(&self) -> Vec<RgbImage> {
        self.encodes.read().await.last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl VideoEncoder for MockVideoEncoder {
    async fn encode(&self, frames: &[RgbImage], fps: f64) -> Result<Vec<u8>, EncodeError> {
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        let (width, height) = check_frames(frames)?;

        let mut data = format!("mock-mp4 {}x{} {} frames @ {}\n", width, height, frames.len(), fps)
            .into_bytes();
        for frame in frames {
            data.push(frame.get_pixel(width / 2, height / 2)[0]);
        }

        self.encodes.write().await.push(frames.to_vec());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_round_trip() {
        let frame = marked_frame(8, 8, 300);
        assert_eq!(frame_marker(&frame), 300);
        assert_eq!(frame.get_pixel(4, 4)[0], FILL);
    }

    #[tokio::test]
    async fn test_decoder_frame_count() {
        let decoder = MockVideoDecoder::new(1.0, 30.0);
        let mut stream = decoder.open(&VideoRef::Url("mock://a".into())).await.unwrap();
        let mut count = 0;
        while let Some(frame) = stream.next_frame().await {
            frame.unwrap();
            count += 1;
        }
        assert_eq!(count, 30);
    }

    #[tokio::test]
    async fn test_decoder_fails_after() {
        let decoder = MockVideoDecoder::new(1.0, 30.0).failing_after(3);
        let mut stream = decoder.open(&VideoRef::Url("mock://a".into())).await.unwrap();
        for _ in 0..3 {
            assert!(stream.next_frame().await.unwrap().is_ok());
        }
        assert!(stream.next_frame().await.unwrap().is_err());
        assert!(stream.next_frame().await.is_none());
    }
}
