//! Ready-made frames and model handles.

use std::path::PathBuf;
use std::sync::Arc;

use crate::extract::{FrameRecord, FrameTag};
use crate::models::{LoadedModel, ModelHandle, ModelKey, WeightsSource};
use crate::pipeline::JobId;

use super::mock_media::marked_frame;
use super::mock_models::{MockFaceModel, MockLandmarkModel, MockSynthesisModel};

/// Concurrency used for fixture handles.
pub const HANDLE_CONCURRENCY: usize = 4;

/// A freshly extracted frame whose marker equals `index`.
pub fn frame_record(job: &str, index: usize, width: u32, height: u32) -> FrameRecord {
    FrameRecord {
        job_id: JobId::parse(job).unwrap_or_else(|_| JobId::generate()),
        index,
        timestamp_secs: index as f64 * 0.2,
        source_pts_secs: index as f64 * 0.2,
        image: Arc::new(marked_frame(width, height, index as u32)),
        tag: FrameTag::Extracted,
    }
}

fn handle(name: &str, model: LoadedModel) -> ModelHandle {
    ModelHandle::new(
        ModelKey::latest(name),
        WeightsSource::Local {
            path: PathBuf::from(format!("/mock/models/{}.safetensors", name)),
        },
        model,
        HANDLE_CONCURRENCY,
    )
}

pub fn face_handle(model: MockFaceModel) -> ModelHandle {
    handle("face-detector", LoadedModel::Face(Arc::new(model)))
}

pub fn landmark_handle(model: MockLandmarkModel) -> ModelHandle {
    handle("landmarker", LoadedModel::Landmark(Arc::new(model)))
}

pub fn synthesis_handle(model: MockSynthesisModel) -> ModelHandle {
    handle("vae", LoadedModel::Synthesis(Arc::new(model)))
}
