//! Inference model contracts.
//!
//! Models are opaque: the pipeline only relies on the input/output contracts
//! below. Implementations doing CPU-heavy work in-process should move it off
//! the async runtime (`tokio::task::spawn_blocking`).

use async_trait::async_trait;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detect::{BoundingBox, RawFace, RawLandmarks};

use super::error::{InferenceError, ModelError};
use super::handle::LoadedModel;
use super::key::ModelKey;

/// Common model behaviour.
pub trait Model: Send + Sync {
    /// Whether the model tolerates concurrent calls.
    ///
    /// Non-reentrant models are called by one task at a time.
    fn reentrant(&self) -> bool {
        true
    }
}

/// Finds faces in a frame.
#[async_trait]
pub trait FaceModel: Model {
    /// Returns zero or more candidates in pixel coordinates.
    async fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>, InferenceError>;
}

/// Locates facial landmarks inside a face box.
#[async_trait]
pub trait LandmarkModel: Model {
    /// Number of points every successful detection returns.
    fn point_count(&self) -> usize;

    /// Returns landmark points in frame pixel coordinates.
    async fn locate(
        &self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<RawLandmarks, InferenceError>;
}

/// Latent representation produced by a synthesis model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Latent(pub Vec<f32>);

impl Latent {
    /// Element-wise mean of equally sized latents.
    pub fn mean<'a>(latents: impl IntoIterator<Item = &'a Latent>) -> Option<Latent> {
        let mut iter = latents.into_iter();
        let mut sum = iter.next()?.0.clone();
        let mut count = 1usize;
        for latent in iter {
            if latent.0.len() != sum.len() {
                return None;
            }
            for (acc, v) in sum.iter_mut().zip(&latent.0) {
                *acc += v;
            }
            count += 1;
        }
        let n = count as f32;
        sum.iter_mut().for_each(|v| *v /= n);
        Some(Latent(sum))
    }
}

/// Encodes masked frames and renders avatar frames from latents.
#[async_trait]
pub trait SynthesisModel: Model {
    /// Encodes the masked region of a frame.
    async fn encode(&self, image: &RgbImage, mask: &GrayImage) -> Result<Latent, InferenceError>;

    /// Renders one output frame from a conditioning latent.
    ///
    /// Must be deterministic for a given `(latent, reference, seed)`.
    async fn decode(
        &self,
        latent: &Latent,
        reference: &RgbImage,
        seed: u64,
    ) -> Result<RgbImage, InferenceError>;
}

/// Turns resolved weights into a usable model.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, key: &ModelKey, weights: &Path) -> Result<LoadedModel, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latent_mean() {
        let a = Latent(vec![1.0, 2.0]);
        let b = Latent(vec![3.0, 6.0]);
        assert_eq!(Latent::mean([&a, &b]), Some(Latent(vec![2.0, 4.0])));
    }

    #[test]
    fn test_latent_mean_rejects_mismatched_lengths() {
        let a = Latent(vec![1.0]);
        let b = Latent(vec![1.0, 2.0]);
        assert_eq!(Latent::mean([&a, &b]), None);
        assert_eq!(Latent::mean(std::iter::empty()), None);
    }
}
