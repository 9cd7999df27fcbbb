//! Avatar synthesis over the surviving frame set.
//!
//! Every masked frame is encoded to a latent. Output frame `i` is decoded from
//! the mean latent of a centered window of input frames, so neighbouring
//! outputs share most of their conditioning. A final pass cross-fades any
//! consecutive pair whose mean pixel difference still exceeds the configured
//! bound.

use futures::stream::{self, StreamExt, TryStreamExt};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{InferenceError, Latent, ModelError, ModelHandle, SynthesisModel};
use crate::retry::{with_retry, RetryConfig, RetryFailure};

use super::encoder::{EncodeError, VideoEncoder};

/// Synthesis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Number of input frames averaged into each output frame's conditioning.
    #[serde(default = "default_conditioning_window")]
    pub conditioning_window: usize,

    /// Maximum mean absolute difference between consecutive output frames (0.0-1.0).
    #[serde(default = "default_max_frame_delta")]
    pub max_frame_delta: f32,

    /// Minimum number of usable frames.
    #[serde(default = "default_min_frames")]
    pub min_frames: usize,

    /// Output frame rate; defaults to the sampling rate.
    #[serde(default)]
    pub output_fps: Option<f64>,
}

fn default_conditioning_window() -> usize {
    5
}

fn default_max_frame_delta() -> f32 {
    0.08
}

fn default_min_frames() -> usize {
    8
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            conditioning_window: default_conditioning_window(),
            max_frame_delta: default_max_frame_delta(),
            min_frames: default_min_frames(),
            output_fps: None,
        }
    }
}

/// Errors from avatar synthesis.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Insufficient frames for synthesis: {available} usable, {required} required")]
    InsufficientFrames { available: usize, required: usize },

    #[error("Frames and masks are misaligned: {0}")]
    Misaligned(String),

    #[error("Synthesis inference failed after {attempts} attempt(s): {source}")]
    Inference {
        source: InferenceError,
        attempts: u32,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Decoded frame {index} is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl From<RetryFailure<InferenceError>> for SynthesisError {
    fn from(failure: RetryFailure<InferenceError>) -> Self {
        Self::Inference {
            source: failure.error,
            attempts: failure.attempts,
        }
    }
}

/// One usable input frame.
#[derive(Debug, Clone)]
pub struct SynthesisInput {
    pub frame_index: usize,
    pub image: Arc<RgbImage>,
    pub mask: Arc<GrayImage>,
}

/// The encoded avatar video.
#[derive(Debug, Clone)]
pub struct AvatarVideo {
    pub data: Vec<u8>,
    pub frame_count: usize,
    pub fps: f64,
    pub seed: u64,
    /// Output frames that were cross-faded to respect the delta bound.
    pub smoothed_frames: usize,
    /// Transient inference failures that succeeded on retry.
    pub retries: u32,
}

/// Deterministic per-job seed.
pub fn job_seed(job_id: &str) -> u64 {
    let digest = Sha256::digest(job_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Mean absolute per-channel difference, normalized to 0.0-1.0.
pub fn frame_delta(a: &RgbImage, b: &RgbImage) -> f32 {
    let (a, b) = (a.as_raw(), b.as_raw());
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (*x as i32 - *y as i32).unsigned_abs() as u64)
        .sum();
    total as f32 / (a.len() as f32 * 255.0)
}

/// Pulls each frame toward its predecessor until consecutive deltas are within `max_delta`.
///
/// Returns the number of frames changed.
pub fn enforce_temporal_bound(frames: &mut [RgbImage], max_delta: f32) -> usize {
    let mut adjusted = 0;
    for i in 1..frames.len() {
        let (head, tail) = frames.split_at_mut(i);
        let previous = &head[i - 1];
        let current = &mut tail[0];

        let delta = frame_delta(previous, current);
        if delta <= max_delta {
            continue;
        }
        let alpha = (max_delta / delta).clamp(0.0, 1.0);
        for (p, c) in previous.as_raw().iter().zip(current.iter_mut()) {
            let step = (*c as f32 - *p as f32) * alpha;
            // Truncation keeps every pixel within alpha of the full step.
            *c = (*p as f32 + step.trunc()) as u8;
        }
        adjusted += 1;
    }
    adjusted
}

/// Produces the avatar video from masked frames.
pub struct AvatarSynthesizer {
    handle: ModelHandle,
    model: Arc<dyn SynthesisModel>,
    encoder: Arc<dyn VideoEncoder>,
    config: SynthesisConfig,
    retry: RetryConfig,
}

impl AvatarSynthesizer {
    /// Fails if `handle` does not wrap a synthesis model.
    pub fn new(
        handle: ModelHandle,
        encoder: Arc<dyn VideoEncoder>,
        config: SynthesisConfig,
    ) -> Result<Self, ModelError> {
        let model = handle.synthesis()?;
        Ok(Self {
            handle,
            model,
            encoder,
            config,
            retry: RetryConfig::default(),
        })
    }

    /// Sets the retry policy for transient inference failures.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Synthesizes the avatar from `inputs`, which must be in frame order.
    pub async fn synthesize(
        &self,
        seed_source: &str,
        inputs: &[SynthesisInput],
        sample_rate_hz: f64,
    ) -> Result<AvatarVideo, SynthesisError> {
        let required = self.config.min_frames.max(1);
        if inputs.len() < required {
            return Err(SynthesisError::InsufficientFrames {
                available: inputs.len(),
                required,
            });
        }
        check_inputs(inputs)?;

        let seed = job_seed(seed_source);
        let retries = AtomicU32::new(0);
        let parallelism = self.handle.concurrency_limit();
        info!(
            "Synthesizing avatar from {} frames (window {}, seed {:016x})",
            inputs.len(),
            self.config.conditioning_window,
            seed
        );

        let encodes: Vec<_> = inputs
            .iter()
            .map(|input| self.encode_one(input, &retries))
            .collect();
        let latents: Vec<Latent> = stream::iter(encodes)
            .buffered(parallelism)
            .try_collect()
            .await?;

        let conditioning = self.conditioning(&latents)?;

        let decodes: Vec<_> = inputs
            .iter()
            .zip(&conditioning)
            .map(|(input, latent)| self.decode_one(input, latent, seed, &retries))
            .collect();
        let mut outputs: Vec<RgbImage> = stream::iter(decodes)
            .buffered(parallelism)
            .try_collect()
            .await?;

        let expected = inputs[0].image.dimensions();
        for (input, output) in inputs.iter().zip(&outputs) {
            if output.dimensions() != expected {
                return Err(SynthesisError::DimensionMismatch {
                    index: input.frame_index,
                    expected,
                    actual: output.dimensions(),
                });
            }
        }

        let smoothed_frames = enforce_temporal_bound(&mut outputs, self.config.max_frame_delta);
        if smoothed_frames > 0 {
            debug!("Cross-faded {} output frames", smoothed_frames);
        }

        let fps = self.config.output_fps.unwrap_or(sample_rate_hz);
        let data = self.encoder.encode(&outputs, fps).await?;

        Ok(AvatarVideo {
            data,
            frame_count: outputs.len(),
            fps,
            seed,
            smoothed_frames,
            retries: retries.load(Ordering::Relaxed),
        })
    }

    fn conditioning(&self, latents: &[Latent]) -> Result<Vec<Latent>, SynthesisError> {
        let half = self.config.conditioning_window.max(1) / 2;
        (0..latents.len())
            .map(|i| {
                let start = i.saturating_sub(half);
                let end = (i + half + 1).min(latents.len());
                Latent::mean(&latents[start..end]).ok_or_else(|| {
                    SynthesisError::from(ModelError::contract_violation(
                        self.handle.key(),
                        "encoder produced latents of different sizes",
                    ))
                })
            })
            .collect()
    }

    async fn encode_one(
        &self,
        input: &SynthesisInput,
        retries: &AtomicU32,
    ) -> Result<Latent, SynthesisError> {
        let attempted = with_retry(
            &self.retry,
            &format!("encode frame {}", input.frame_index),
            |_| self.handle.gated(self.model.encode(&input.image, &input.mask)),
        )
        .await?;
        retries.fetch_add(attempted.retries(), Ordering::Relaxed);
        Ok(attempted.value)
    }

    async fn decode_one(
        &self,
        input: &SynthesisInput,
        latent: &Latent,
        seed: u64,
        retries: &AtomicU32,
    ) -> Result<RgbImage, SynthesisError> {
        let attempted = with_retry(
            &self.retry,
            &format!("decode frame {}", input.frame_index),
            |_| self.handle.gated(self.model.decode(latent, &input.image, seed)),
        )
        .await?;
        retries.fetch_add(attempted.retries(), Ordering::Relaxed);
        Ok(attempted.value)
    }
}

fn check_inputs(inputs: &[SynthesisInput]) -> Result<(), SynthesisError> {
    for pair in inputs.windows(2) {
        if pair[1].frame_index <= pair[0].frame_index {
            return Err(SynthesisError::Misaligned(format!(
                "frame {} follows frame {}",
                pair[1].frame_index, pair[0].frame_index
            )));
        }
    }
    for input in inputs {
        if input.image.dimensions() != input.mask.dimensions() {
            return Err(SynthesisError::Misaligned(format!(
                "mask of frame {} is {:?}, frame is {:?}",
                input.frame_index,
                input.mask.dimensions(),
                input.image.dimensions()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockSynthesisModel, MockVideoEncoder};
    use image::Rgb;

    fn inputs(values: &[u8]) -> Vec<SynthesisInput> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| SynthesisInput {
                frame_index: i * 2,
                image: Arc::new(RgbImage::from_pixel(8, 6, Rgb([v, v, v]))),
                mask: Arc::new(GrayImage::from_pixel(8, 6, image::Luma([255]))),
            })
            .collect()
    }

    fn synthesizer(
        model: MockSynthesisModel,
        encoder: Arc<MockVideoEncoder>,
        config: SynthesisConfig,
    ) -> AvatarSynthesizer {
        AvatarSynthesizer::new(fixtures::synthesis_handle(model), encoder, config)
            .unwrap()
            .with_retry(RetryConfig::immediate(3))
    }

    fn config(window: usize, max_delta: f32, min_frames: usize) -> SynthesisConfig {
        SynthesisConfig {
            conditioning_window: window,
            max_frame_delta: max_delta,
            min_frames,
            output_fps: None,
        }
    }

    #[test]
    fn test_job_seed_is_stable() {
        assert_eq!(job_seed("job-1"), job_seed("job-1"));
        assert_ne!(job_seed("job-1"), job_seed("job-2"));
    }

    #[test]
    fn test_temporal_bound() {
        let mut frames: Vec<RgbImage> = [0u8, 200, 0, 200, 0]
            .iter()
            .map(|&v| RgbImage::from_pixel(4, 4, Rgb([v, v, v])))
            .collect();
        let adjusted = enforce_temporal_bound(&mut frames, 0.1);

        // Frame 1 is pulled to 25, which leaves frame 2 within the bound.
        assert_eq!(adjusted, 2);
        for pair in frames.windows(2) {
            assert!(frame_delta(&pair[0], &pair[1]) <= 0.1);
        }
    }

    #[test]
    fn test_temporal_bound_on_ramp() {
        let mut frames: Vec<RgbImage> = [0u8, 100, 200, 250]
            .iter()
            .map(|&v| RgbImage::from_pixel(4, 4, Rgb([v, v, v])))
            .collect();
        let adjusted = enforce_temporal_bound(&mut frames, 0.1);

        assert_eq!(adjusted, 3);
        let levels: Vec<u8> = frames.iter().map(|f| f.get_pixel(0, 0)[0]).collect();
        assert_eq!(levels, vec![0, 25, 50, 75]);
    }

    #[test]
    fn test_temporal_bound_leaves_smooth_sequences() {
        let mut frames: Vec<RgbImage> = [10u8, 12, 14]
            .iter()
            .map(|&v| RgbImage::from_pixel(4, 4, Rgb([v, v, v])))
            .collect();
        let before = frames.clone();
        assert_eq!(enforce_temporal_bound(&mut frames, 0.1), 0);
        assert_eq!(frames, before);
    }

    #[tokio::test]
    async fn test_insufficient_frames() {
        let encoder = Arc::new(MockVideoEncoder::new());
        let synth = synthesizer(MockSynthesisModel::new(), encoder.clone(), config(3, 0.1, 8));

        let err = synth.synthesize("job", &inputs(&[1, 2, 3]), 5.0).await.unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::InsufficientFrames { available: 3, required: 8 }
        ));
        assert_eq!(encoder.encode_count().await, 0);
    }

    #[tokio::test]
    async fn test_output_is_coherent_and_ordered() {
        let encoder = Arc::new(MockVideoEncoder::new());
        let synth = synthesizer(MockSynthesisModel::new(), encoder.clone(), config(1, 0.1, 2));

        let video = synth
            .synthesize("job", &inputs(&[0, 250, 0, 250, 0, 250]), 5.0)
            .await
            .unwrap();
        assert_eq!(video.frame_count, 6);
        assert_eq!(video.fps, 5.0);
        assert_eq!(video.seed, job_seed("job"));
        assert!(video.smoothed_frames > 0);

        let frames = encoder.last_frames().await;
        assert_eq!(frames.len(), 6);
        for pair in frames.windows(2) {
            assert!(frame_delta(&pair[0], &pair[1]) <= 0.1);
        }
    }

    #[tokio::test]
    async fn test_conditioning_window_averages_neighbours() {
        let encoder = Arc::new(MockVideoEncoder::new());
        let synth = synthesizer(MockSynthesisModel::new(), encoder.clone(), config(3, 1.0, 1));

        synth.synthesize("job", &inputs(&[0, 30, 60]), 5.0).await.unwrap();
        let frames = encoder.last_frames().await;
        // Window of three: [0,30] -> 15, [0,30,60] -> 30, [30,60] -> 45
        let values: Vec<u8> = frames.iter().map(|f| f.get_pixel(0, 0).0[0]).collect();
        assert_eq!(values, vec![15, 30, 45]);
    }

    #[tokio::test]
    async fn test_deterministic_for_same_job() {
        let run = |job: &'static str| async move {
            let encoder = Arc::new(MockVideoEncoder::new());
            let synth = synthesizer(MockSynthesisModel::new(), encoder.clone(), config(3, 0.2, 1));
            synth.synthesize(job, &inputs(&[5, 80, 20, 90]), 5.0).await.unwrap();
            encoder.last_frames().await
        };
        assert_eq!(run("job-a").await, run("job-a").await);
    }

    #[tokio::test]
    async fn test_transient_inference_retried() {
        let model = MockSynthesisModel::new();
        model.fail_times(InferenceError::Transient("busy".into()), 2).await;
        let encoder = Arc::new(MockVideoEncoder::new());
        let synth = synthesizer(model, encoder, config(1, 1.0, 1));

        let video = synth.synthesize("job", &inputs(&[1, 2]), 5.0).await.unwrap();
        assert_eq!(video.retries, 2);
    }

    #[tokio::test]
    async fn test_misaligned_inputs() {
        let encoder = Arc::new(MockVideoEncoder::new());
        let synth = synthesizer(MockSynthesisModel::new(), encoder, config(1, 1.0, 1));
        let mut frames = inputs(&[1, 2]);
        frames.reverse();
        let err = synth.synthesize("job", &frames, 5.0).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Misaligned(_)));
    }
}
