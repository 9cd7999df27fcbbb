//! Face and landmark detection stages.

mod error;
mod face;
mod landmark;
mod types;

pub use error::DetectionError;
pub use face::FaceDetector;
pub use landmark::LandmarkDetector;
pub use types::{
    BoundingBox, FaceDetection, LandmarkPoint, LandmarkSet, PixelRect, RawFace, RawLandmarks,
};
