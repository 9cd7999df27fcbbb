//! Models served by an HTTP inference sidecar.
//!
//! The sidecar owns the accelerator. We ask it to load resolved weights, then
//! call per-model endpoints with PNG-encoded frames.

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::detect::{BoundingBox, RawFace, RawLandmarks};

use super::error::{InferenceError, ModelError};
use super::handle::{LoadedModel, ModelKind};
use super::key::ModelKey;
use super::traits::{FaceModel, LandmarkModel, Latent, Model, ModelLoader, SynthesisModel};

/// Inference sidecar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceServiceConfig {
    /// Base URL (e.g., "http://localhost:8500")
    pub url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    60
}

#[derive(Serialize)]
struct LoadRequest<'a> {
    name: &'a str,
    version: String,
    weights_path: String,
}

#[derive(Deserialize)]
struct LoadResponse {
    model_id: String,
    kind: ModelKind,
    #[serde(default)]
    point_count: Option<usize>,
    #[serde(default = "default_reentrant")]
    reentrant: bool,
}

fn default_reentrant() -> bool {
    true
}

#[derive(Deserialize)]
struct DetectResponse {
    faces: Vec<RawFace>,
}

#[derive(Deserialize)]
struct EncodeResponse {
    latent: Vec<f32>,
}

fn request_error(e: reqwest::Error) -> InferenceError {
    if e.is_timeout() || e.is_connect() {
        InferenceError::Transient(e.to_string())
    } else {
        InferenceError::Backend(e.to_string())
    }
}

/// Maps HTTP status codes: 429/5xx are transient, other 4xx reject the input.
async fn check(response: Response) -> Result<Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{} - {}", status.as_u16(), body);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(InferenceError::Transient(message))
    } else {
        Err(InferenceError::Rejected(message))
    }
}

fn png_part(image: DynamicImage, name: &str) -> Result<Part, InferenceError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| InferenceError::Backend(format!("PNG encoding failed: {}", e)))?;
    Part::bytes(buf)
        .file_name(format!("{}.png", name))
        .mime_str("image/png")
        .map_err(request_error)
}

/// Loads models into the inference sidecar.
pub struct RemoteModelLoader {
    client: Client,
    base_url: String,
}

impl RemoteModelLoader {
    pub fn new(config: &InferenceServiceConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModelLoader for RemoteModelLoader {
    async fn load(&self, key: &ModelKey, weights: &Path) -> Result<LoadedModel, ModelError> {
        let url = format!("{}/v1/models/load", self.base_url);
        let request = LoadRequest {
            name: &key.name,
            version: key.version.to_string(),
            weights_path: weights.display().to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::unavailable(key, e.to_string()))?;
        let response = check(response)
            .await
            .map_err(|e| ModelError::unavailable(key, e.to_string()))?;
        let loaded: LoadResponse = response
            .json()
            .await
            .map_err(|e| ModelError::unavailable(key, format!("bad load response: {}", e)))?;

        debug!("Sidecar loaded {} as {} ({})", key, loaded.model_id, loaded.kind);

        let model = Arc::new(RemoteModel {
            client: self.client.clone(),
            endpoint: format!("{}/v1/models/{}", self.base_url, loaded.model_id),
            reentrant: loaded.reentrant,
            point_count: loaded.point_count.unwrap_or(0),
        });

        Ok(match loaded.kind {
            ModelKind::Face => LoadedModel::Face(model),
            ModelKind::Landmark => {
                if model.point_count == 0 {
                    return Err(ModelError::contract_violation(
                        key,
                        "landmark model did not declare a point count",
                    ));
                }
                LoadedModel::Landmark(model)
            }
            ModelKind::Synthesis => LoadedModel::Synthesis(model),
        })
    }
}

/// Proxy for one model loaded in the sidecar.
struct RemoteModel {
    client: Client,
    endpoint: String,
    reentrant: bool,
    point_count: usize,
}

impl RemoteModel {
    async fn post(&self, action: &str, form: Form) -> Result<Response, InferenceError> {
        let response = self
            .client
            .post(format!("{}/{}", self.endpoint, action))
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;
        check(response).await
    }
}

impl Model for RemoteModel {
    fn reentrant(&self) -> bool {
        self.reentrant
    }
}

#[async_trait]
impl FaceModel for RemoteModel {
    async fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>, InferenceError> {
        let frame = png_part(DynamicImage::ImageRgb8(image.clone()), "frame")?;
        let form = Form::new().part("image", frame);
        let response: DetectResponse = self
            .post("detect", form)
            .await?
            .json()
            .await
            .map_err(request_error)?;
        Ok(response.faces)
    }
}

#[async_trait]
impl LandmarkModel for RemoteModel {
    fn point_count(&self) -> usize {
        self.point_count
    }

    async fn locate(
        &self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<RawLandmarks, InferenceError> {
        let bbox = serde_json::to_string(face)
            .map_err(|e| InferenceError::Backend(e.to_string()))?;
        let form = Form::new()
            .part("image", png_part(DynamicImage::ImageRgb8(image.clone()), "frame")?)
            .text("bbox", bbox);
        self.post("landmarks", form)
            .await?
            .json()
            .await
            .map_err(request_error)
    }
}

#[async_trait]
impl SynthesisModel for RemoteModel {
    async fn encode(&self, image: &RgbImage, mask: &GrayImage) -> Result<Latent, InferenceError> {
        let form = Form::new()
            .part("image", png_part(DynamicImage::ImageRgb8(image.clone()), "frame")?)
            .part("mask", png_part(DynamicImage::ImageLuma8(mask.clone()), "mask")?);
        let response: EncodeResponse = self
            .post("encode", form)
            .await?
            .json()
            .await
            .map_err(request_error)?;
        Ok(Latent(response.latent))
    }

    async fn decode(
        &self,
        latent: &Latent,
        reference: &RgbImage,
        seed: u64,
    ) -> Result<RgbImage, InferenceError> {
        let latent = serde_json::to_string(&latent.0)
            .map_err(|e| InferenceError::Backend(e.to_string()))?;
        let form = Form::new()
            .part(
                "reference",
                png_part(DynamicImage::ImageRgb8(reference.clone()), "reference")?,
            )
            .text("latent", latent)
            .text("seed", seed.to_string());
        let bytes = self
            .post("decode", form)
            .await?
            .bytes()
            .await
            .map_err(request_error)?;

        image::load_from_memory(&bytes)
            .map(|img| img.to_rgb8())
            .map_err(|e| InferenceError::Backend(format!("bad frame from sidecar: {}", e)))
    }
}
