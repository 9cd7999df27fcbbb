//! Job and orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::mask::MaskRegion;
use crate::models::ModelKey;
use crate::retry::RetryConfig;
use crate::synth::SynthesisConfig;

/// Per-job processing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Frame sampling rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,

    /// Minimum confidence for a face detection (0.0-1.0).
    #[serde(default = "default_confidence_threshold")]
    pub face_confidence_threshold: f32,

    /// Minimum confidence for a landmark set (0.0-1.0).
    #[serde(default = "default_confidence_threshold")]
    pub landmark_confidence_threshold: f32,

    /// Maximum tolerated fraction of dropped frames (0.0-1.0).
    #[serde(default = "default_drop_threshold")]
    pub drop_threshold: f64,

    /// Accept fewer frames than expected if decoding stops early.
    #[serde(default = "default_true")]
    pub tolerate_partial_extraction: bool,

    /// Frames scheduled per batch; cancellation is checked between batches.
    #[serde(default = "default_batch_size")]
    pub frame_batch_size: usize,

    /// Region covered by masks.
    #[serde(default)]
    pub mask_region: MaskRegion,

    /// Smallest mask area in pixels.
    #[serde(default = "default_min_mask_area")]
    pub min_mask_area_px: f64,

    /// Avatar synthesis parameters.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default = "default_face_model")]
    pub face_model: ModelKey,

    #[serde(default = "default_landmark_model")]
    pub landmark_model: ModelKey,

    #[serde(default = "default_synthesis_model")]
    pub synthesis_model: ModelKey,
}

fn default_sample_rate() -> f64 {
    5.0
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_drop_threshold() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    16
}

fn default_min_mask_area() -> f64 {
    64.0
}

fn default_face_model() -> ModelKey {
    ModelKey::latest("face-detector")
}

fn default_landmark_model() -> ModelKey {
    ModelKey::latest("landmarker")
}

fn default_synthesis_model() -> ModelKey {
    ModelKey::latest("vae")
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate(),
            face_confidence_threshold: default_confidence_threshold(),
            landmark_confidence_threshold: default_confidence_threshold(),
            drop_threshold: default_drop_threshold(),
            tolerate_partial_extraction: true,
            frame_batch_size: default_batch_size(),
            mask_region: MaskRegion::default(),
            min_mask_area_px: default_min_mask_area(),
            synthesis: SynthesisConfig::default(),
            face_model: default_face_model(),
            landmark_model: default_landmark_model(),
            synthesis_model: default_synthesis_model(),
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be between 0.0 and 1.0, got {}", name, value))
    }
}

impl JobConfig {
    /// Sets the sampling rate.
    pub fn with_sample_rate(mut self, hz: f64) -> Self {
        self.sample_rate_hz = hz;
        self
    }

    /// Sets the dropped-frame threshold.
    pub fn with_drop_threshold(mut self, threshold: f64) -> Self {
        self.drop_threshold = threshold;
        self
    }

    /// Sets the frame batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.frame_batch_size = size;
        self
    }

    /// Sets the minimum number of frames for synthesis.
    pub fn with_min_synthesis_frames(mut self, frames: usize) -> Self {
        self.synthesis.min_frames = frames;
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.sample_rate_hz > 0.0 && self.sample_rate_hz.is_finite()) {
            return Err(format!(
                "sample_rate_hz must be positive, got {}",
                self.sample_rate_hz
            ));
        }
        check_unit("face_confidence_threshold", self.face_confidence_threshold as f64)?;
        check_unit(
            "landmark_confidence_threshold",
            self.landmark_confidence_threshold as f64,
        )?;
        check_unit("drop_threshold", self.drop_threshold)?;
        check_unit("synthesis.max_frame_delta", self.synthesis.max_frame_delta as f64)?;
        if self.frame_batch_size == 0 {
            return Err("frame_batch_size must be at least 1".to_string());
        }
        if self.synthesis.min_frames == 0 {
            return Err("synthesis.min_frames must be at least 1".to_string());
        }
        if self.synthesis.conditioning_window == 0 {
            return Err("synthesis.conditioning_window must be at least 1".to_string());
        }
        if let Some(fps) = self.synthesis.output_fps {
            if !(fps > 0.0 && fps.is_finite()) {
                return Err(format!("synthesis.output_fps must be positive, got {}", fps));
            }
        }
        if !(self.min_mask_area_px >= 0.0) {
            return Err("min_mask_area_px must not be negative".to_string());
        }
        Ok(())
    }
}

/// Process-wide orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Concurrent inference slots for frame tasks.
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,

    /// Jobs allowed in flight before submissions are rejected.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_jobs: usize,

    /// Frame tasks allowed to wait for a slot before submissions are rejected.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// Concurrent artifact uploads per job.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// In-place retries for transient inference failures.
    #[serde(default)]
    pub stage_retry: RetryConfig,
}

fn default_worker_slots() -> usize {
    4
}

fn default_max_in_flight() -> usize {
    2
}

fn default_max_queue_depth() -> usize {
    256
}

fn default_upload_concurrency() -> usize {
    8
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_slots: default_worker_slots(),
            max_in_flight_jobs: default_max_in_flight(),
            max_queue_depth: default_max_queue_depth(),
            upload_concurrency: default_upload_concurrency(),
            stage_retry: RetryConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the number of worker slots.
    pub fn with_worker_slots(mut self, slots: usize) -> Self {
        self.worker_slots = slots;
        self
    }

    /// Sets the in-flight job limit.
    pub fn with_max_in_flight_jobs(mut self, max: usize) -> Self {
        self.max_in_flight_jobs = max;
        self
    }

    /// Sets the stage retry policy.
    pub fn with_stage_retry(mut self, retry: RetryConfig) -> Self {
        self.stage_retry = retry;
        self
    }
}
