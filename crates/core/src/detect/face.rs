//! Primary face detection.

use std::sync::Arc;
use tracing::debug;

use crate::extract::FrameRecord;
use crate::models::{FaceModel, InferenceError, ModelError, ModelHandle};

use super::error::DetectionError;
use super::types::{BoundingBox, FaceDetection};

/// Finds the single primary face of a frame.
#[derive(Clone)]
pub struct FaceDetector {
    handle: ModelHandle,
    model: Arc<dyn FaceModel>,
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Fails if `handle` does not wrap a face model.
    pub fn new(handle: ModelHandle, confidence_threshold: f32) -> Result<Self, ModelError> {
        let model = handle.face()?;
        Ok(Self {
            handle,
            model,
            confidence_threshold,
        })
    }

    /// Returns the highest-confidence face, or `None` if no candidate reaches the threshold.
    ///
    /// The box is clamped into the frame; candidates that collapse to zero
    /// area are ignored.
    pub async fn detect(
        &self,
        frame: &FrameRecord,
    ) -> Result<Option<FaceDetection>, DetectionError> {
        let faces = match self.handle.gated(self.model.detect(&frame.image)).await {
            Ok(faces) => faces,
            Err(InferenceError::Rejected(reason)) => {
                debug!("Face model rejected frame {}: {}", frame.index, reason);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let (width, height) = (frame.width(), frame.height());
        let mut candidates: Vec<(BoundingBox, f32)> = faces
            .iter()
            .filter(|f| f.confidence.is_finite())
            .filter_map(|f| {
                BoundingBox::from_pixels(f.x1, f.y1, f.x2, f.y2, width, height)
                    .map(|bbox| (bbox, f.confidence.clamp(0.0, 1.0)))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(candidates
            .into_iter()
            .next()
            .filter(|(_, confidence)| *confidence >= self.confidence_threshold)
            .map(|(bbox, confidence)| FaceDetection {
                frame_index: frame.index,
                bbox,
                confidence,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RawFace;
    use crate::testing::{fixtures, MockFaceModel};

    fn detector(model: MockFaceModel, threshold: f32) -> FaceDetector {
        FaceDetector::new(fixtures::face_handle(model), threshold).unwrap()
    }

    #[tokio::test]
    async fn test_picks_highest_confidence() {
        let model = MockFaceModel::new().with_faces(vec![
            RawFace { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0, confidence: 0.6 },
            RawFace { x1: 20.0, y1: 10.0, x2: 40.0, y2: 30.0, confidence: 0.9 },
        ]);
        let frame = fixtures::frame_record("job", 4, 64, 48);

        let face = detector(model, 0.5).detect(&frame).await.unwrap().unwrap();
        assert_eq!(face.frame_index, 4);
        assert_eq!(face.confidence, 0.9);
        assert!((face.bbox.x1 - 20.0 / 64.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_below_threshold_is_no_face() {
        let model = MockFaceModel::new().with_confidence(|_| Some(0.3));
        let frame = fixtures::frame_record("job", 0, 64, 48);
        assert!(detector(model, 0.5).detect(&frame).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_box_clamped_into_frame() {
        let model = MockFaceModel::new().with_faces(vec![RawFace {
            x1: -30.0,
            y1: -5.0,
            x2: 100.0,
            y2: 60.0,
            confidence: 0.99,
        }]);
        let frame = fixtures::frame_record("job", 0, 64, 48);

        let face = detector(model, 0.5).detect(&frame).await.unwrap().unwrap();
        let b = face.bbox;
        assert!([b.x1, b.y1, b.x2, b.y2].iter().all(|v| (0.0..=1.0).contains(v)));
        let rect = face.bbox.to_pixels(64, 48);
        assert!(rect.x + rect.width <= 64 && rect.y + rect.height <= 48);
    }

    #[tokio::test]
    async fn test_rejected_input_is_no_face() {
        let model = MockFaceModel::new();
        model.fail_next(InferenceError::Rejected("blank".into())).await;
        let frame = fixtures::frame_record("job", 0, 64, 48);
        assert!(detector(model, 0.5).detect(&frame).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_error_propagates() {
        let model = MockFaceModel::new();
        model.fail_next(InferenceError::Transient("busy".into())).await;
        let frame = fixtures::frame_record("job", 0, 64, 48);
        let err = detector(model, 0.5).detect(&frame).await.unwrap_err();
        assert!(matches!(err, DetectionError::Inference(InferenceError::Transient(_))));
    }

    #[test]
    fn test_requires_face_model() {
        let handle = fixtures::landmark_handle(crate::testing::MockLandmarkModel::new(68));
        assert!(FaceDetector::new(handle, 0.5).is_err());
    }
}
