//! Segmentation masks derived from landmarks.

mod generator;
mod geometry;

pub use generator::{MaskArtifact, MaskError, MaskGenerator, MaskRegion, MASK_ON};
