//! Facial landmark detection.

use std::sync::Arc;
use tracing::debug;

use crate::extract::FrameRecord;
use crate::models::{InferenceError, LandmarkModel, ModelError, ModelHandle};

use super::error::DetectionError;
use super::types::{FaceDetection, LandmarkSet};

/// Locates a fixed number of landmarks inside a detected face.
#[derive(Clone)]
pub struct LandmarkDetector {
    handle: ModelHandle,
    model: Arc<dyn LandmarkModel>,
    confidence_threshold: f32,
    point_count: usize,
}

impl LandmarkDetector {
    /// Fails if `handle` does not wrap a landmark model declaring a point count.
    pub fn new(handle: ModelHandle, confidence_threshold: f32) -> Result<Self, ModelError> {
        let model = handle.landmark()?;
        let point_count = model.point_count();
        if point_count == 0 {
            return Err(ModelError::contract_violation(
                handle.key(),
                "landmark model declares zero points",
            ));
        }
        Ok(Self {
            handle,
            model,
            confidence_threshold,
            point_count,
        })
    }

    /// Points every successful detection carries.
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Returns landmarks, or `None` if the frame should be marked `landmark_failed`.
    ///
    /// A non-empty result with a different point count than declared is a
    /// contract violation.
    pub async fn locate(
        &self,
        frame: &FrameRecord,
        face: &FaceDetection,
    ) -> Result<Option<LandmarkSet>, DetectionError> {
        let raw = match self
            .handle
            .gated(self.model.locate(&frame.image, &face.bbox))
            .await
        {
            Ok(raw) => raw,
            Err(InferenceError::Rejected(reason)) => {
                debug!("Landmark model rejected frame {}: {}", frame.index, reason);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if raw.points.is_empty() {
            return Ok(None);
        }
        if raw.points.len() != self.point_count {
            return Err(ModelError::contract_violation(
                self.handle.key(),
                format!(
                    "returned {} landmarks for frame {}, declared {}",
                    raw.points.len(),
                    frame.index,
                    self.point_count
                ),
            )
            .into());
        }
        if !(raw.confidence >= self.confidence_threshold)
            || !raw.points.iter().all(|p| p.is_finite())
        {
            return Ok(None);
        }

        Ok(Some(LandmarkSet {
            frame_index: frame.index,
            points: raw.points,
            confidence: raw.confidence,
        }))
    }
}
