//! Mock inference models, loader and hub for testing.

use async_trait::async_trait;
use image::{GrayImage, Rgb, RgbImage};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::detect::{BoundingBox, LandmarkPoint, RawFace, RawLandmarks};
use crate::models::{
    FaceModel, InferenceError, LandmarkModel, Latent, LoadedModel, Model, ModelError, ModelHub,
    ModelKey, ModelLoader, SynthesisModel,
};

use super::mock_media::frame_marker;

type FaceConfidenceFn = dyn Fn(u32) -> Option<f32> + Send + Sync;
type LandmarkConfidenceFn = dyn Fn(u32) -> f32 + Send + Sync;
type MarkerDelayFn = dyn Fn(u32) -> Duration + Send + Sync;
type MarkerPredicate = dyn Fn(u32) -> bool + Send + Sync;

/// Behaviour shared by the mock models: call counting, injected failures, latency.
#[derive(Default)]
struct CallControl {
    calls: AtomicUsize,
    errors: RwLock<VecDeque<InferenceError>>,
    delay: Option<Duration>,
}

impl CallControl {
    async fn enter(&self) -> Result<(), InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.errors.write().await.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn fail_times(&self, error: InferenceError, times: usize) {
        let mut errors = self.errors.write().await;
        for _ in 0..times {
            errors.push_back(error.clone());
        }
    }
}

/// Face model that finds one centred face per frame.
///
/// The default face spans the middle half of the frame with confidence 0.95.
/// `with_confidence` decides per frame, keyed by the frame marker.
pub struct MockFaceModel {
    faces: Option<Vec<RawFace>>,
    confidence: Arc<FaceConfidenceFn>,
    marker_delay: Option<Arc<MarkerDelayFn>>,
    control: CallControl,
}

impl Default for MockFaceModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFaceModel {
    pub fn new() -> Self {
        Self {
            faces: None,
            confidence: Arc::new(|_| Some(0.95)),
            marker_delay: None,
            control: CallControl::default(),
        }
    }

    /// Returns exactly these candidates for every frame.
    pub fn with_faces(mut self, faces: Vec<RawFace>) -> Self {
        self.faces = Some(faces);
        self
    }

    /// Confidence of the centred face per frame marker; `None` means no face.
    pub fn with_confidence<F>(mut self, confidence: F) -> Self
    where
        F: Fn(u32) -> Option<f32> + Send + Sync + 'static,
    {
        self.confidence = Arc::new(confidence);
        self
    }

    /// Sleeps this long on every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.control.delay = Some(delay);
        self
    }

    /// Sleeps for a per-frame duration, keyed by the frame marker.
    pub fn with_marker_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.marker_delay = Some(Arc::new(delay));
        self
    }

    /// Makes the next call fail with `error`.
    pub async fn fail_next(&self, error: InferenceError) {
        self.control.fail_times(error, 1).await;
    }

    /// Makes the next `times` calls fail with `error`.
    pub async fn fail_times(&self, error: InferenceError, times: usize) {
        self.control.fail_times(error, times).await;
    }

    pub fn call_count(&self) -> usize {
        self.control.calls.load(Ordering::SeqCst)
    }
}

impl Model for MockFaceModel {}

#[async_trait]
impl FaceModel for MockFaceModel {
    async fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>, InferenceError> {
        self.control.enter().await?;
        if let Some(delay) = &self.marker_delay {
            tokio::time::sleep(delay(frame_marker(image))).await;
        }
        if let Some(faces) = &self.faces {
            return Ok(faces.clone());
        }

        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok((self.confidence)(frame_marker(image))
            .map(|confidence| RawFace {
                x1: w * 0.25,
                y1: h * 0.25,
                x2: w * 0.75,
                y2: h * 0.75,
                confidence,
            })
            .into_iter()
            .collect())
    }
}

/// Landmark model placing its points on an ellipse inside the face box.
pub struct MockLandmarkModel {
    declared: usize,
    returned: usize,
    points: Option<Vec<LandmarkPoint>>,
    confidence: Arc<LandmarkConfidenceFn>,
    collapsed: Arc<MarkerPredicate>,
    reentrant: bool,
    control: CallControl,
}

impl MockLandmarkModel {
    /// A model declaring `point_count` points.
    pub fn new(point_count: usize) -> Self {
        Self {
            declared: point_count,
            returned: point_count,
            points: None,
            confidence: Arc::new(|_| 0.9),
            collapsed: Arc::new(|_| false),
            reentrant: true,
            control: CallControl::default(),
        }
    }

    /// Returns `count` points while still declaring the original count.
    pub fn returning_points(mut self, count: usize) -> Self {
        self.returned = count;
        self
    }

    /// Returns exactly these points for every frame.
    pub fn with_points(mut self, points: Vec<LandmarkPoint>) -> Self {
        self.points = Some(points);
        self
    }

    /// Confidence per frame marker.
    pub fn with_confidence<F>(mut self, confidence: F) -> Self
    where
        F: Fn(u32) -> f32 + Send + Sync + 'static,
    {
        self.confidence = Arc::new(confidence);
        self
    }

    /// Puts every point on the face centre for matching frame markers.
    pub fn collapsed_when<F>(mut self, collapsed: F) -> Self
    where
        F: Fn(u32) -> bool + Send + Sync + 'static,
    {
        self.collapsed = Arc::new(collapsed);
        self
    }

    pub fn non_reentrant(mut self) -> Self {
        self.reentrant = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.control.delay = Some(delay);
        self
    }

    pub async fn fail_next(&self, error: InferenceError) {
        self.control.fail_times(error, 1).await;
    }

    pub fn call_count(&self) -> usize {
        self.control.calls.load(Ordering::SeqCst)
    }
}

impl Model for MockLandmarkModel {
    fn reentrant(&self) -> bool {
        self.reentrant
    }
}

#[async_trait]
impl LandmarkModel for MockLandmarkModel {
    fn point_count(&self) -> usize {
        self.declared
    }

    async fn locate(
        &self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<RawLandmarks, InferenceError> {
        self.control.enter().await?;
        let marker = frame_marker(image);
        let confidence = (self.confidence)(marker);
        if let Some(points) = &self.points {
            return Ok(RawLandmarks {
                points: points.clone(),
                confidence,
            });
        }

        let rect = face.to_pixels(image.width(), image.height());
        let cx = rect.x as f32 + rect.width as f32 / 2.0;
        let cy = rect.y as f32 + rect.height as f32 / 2.0;
        let (rx, ry) = if (self.collapsed)(marker) {
            (0.0, 0.0)
        } else {
            (rect.width as f32 * 0.4, rect.height as f32 * 0.4)
        };
        let n = self.returned.max(1) as f32;
        let points = (0..self.returned)
            .map(|i| {
                let angle = std::f32::consts::TAU * i as f32 / n;
                LandmarkPoint::Planar([cx + rx * angle.cos(), cy + ry * angle.sin()])
            })
            .collect();

        Ok(RawLandmarks { points, confidence })
    }
}

/// Synthesis model with transparent arithmetic.
///
/// `encode` yields the mean red value of the frame; `decode` renders a
/// uniform frame of that value, independent of the seed.
#[derive(Default)]
pub struct MockSynthesisModel {
    control: CallControl,
}

impl MockSynthesisModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls (encode or decode) fail with `error`.
    pub async fn fail_times(&self, error: InferenceError, times: usize) {
        self.control.fail_times(error, times).await;
    }

    pub fn call_count(&self) -> usize {
        self.control.calls.load(Ordering::SeqCst)
    }
}

impl Model for MockSynthesisModel {}

#[async_trait]
impl SynthesisModel for MockSynthesisModel {
    async fn encode(&self, image: &RgbImage, _mask: &GrayImage) -> Result<Latent, InferenceError> {
        self.control.enter().await?;
        let pixels = (image.width() * image.height()).max(1) as f32;
        let sum: f32 = image.pixels().map(|p| p[0] as f32).sum();
        Ok(Latent(vec![sum / pixels]))
    }

    async fn decode(
        &self,
        latent: &Latent,
        reference: &RgbImage,
        _seed: u64,
    ) -> Result<RgbImage, InferenceError> {
        self.control.enter().await?;
        let value = latent
            .0
            .first()
            .copied()
            .unwrap_or(0.0)
            .round()
            .clamp(0.0, 255.0) as u8;
        Ok(RgbImage::from_pixel(
            reference.width(),
            reference.height(),
            Rgb([value, value, value]),
        ))
    }
}

/// Loader handing out mock models by key name.
///
/// Names containing "face" load a face model, names containing "landmark"
/// a 68-point landmark model, anything else a synthesis model. Tests can
/// install their own instances to keep a handle on them.
pub struct MockModelLoader {
    face: Arc<MockFaceModel>,
    landmark: Arc<MockLandmarkModel>,
    synthesis: Arc<MockSynthesisModel>,
    delay: Option<Duration>,
    loads: RwLock<HashMap<ModelKey, usize>>,
    failing: RwLock<HashSet<ModelKey>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for MockModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModelLoader {
    pub fn new() -> Self {
        Self {
            face: Arc::new(MockFaceModel::new()),
            landmark: Arc::new(MockLandmarkModel::new(68)),
            synthesis: Arc::new(MockSynthesisModel::new()),
            delay: None,
            loads: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_face_model(mut self, model: Arc<MockFaceModel>) -> Self {
        self.face = model;
        self
    }

    pub fn with_landmark_model(mut self, model: Arc<MockLandmarkModel>) -> Self {
        self.landmark = model;
        self
    }

    pub fn with_synthesis_model(mut self, model: Arc<MockSynthesisModel>) -> Self {
        self.synthesis = model;
        self
    }

    /// Makes every load take at least `delay`.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes the next load of `key` fail.
    pub async fn fail_next_load(&self, key: &ModelKey) {
        self.failing.write().await.insert(key.clone());
    }

    /// Load attempts for `key`, failed ones included.
    pub async fn load_count(&self, key: &ModelKey) -> usize {
        self.loads.read().await.get(key).copied().unwrap_or(0)
    }

    /// Total load attempts across all keys.
    pub async fn total_loads(&self) -> usize {
        self.loads.read().await.values().sum()
    }

    /// Most loads observed running at the same time.
    pub fn peak_concurrent_loads(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for MockModelLoader {
    async fn load(&self, key: &ModelKey, _weights: &Path) -> Result<LoadedModel, ModelError> {
        *self.loads.write().await.entry(key.clone()).or_insert(0) += 1;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.write().await.remove(key) {
            return Err(ModelError::unavailable(key, "simulated load failure"));
        }

        let name = key.name.to_ascii_lowercase();
        Ok(if name.contains("face") {
            LoadedModel::Face(self.face.clone())
        } else if name.contains("landmark") {
            LoadedModel::Landmark(self.landmark.clone())
        } else {
            LoadedModel::Synthesis(self.synthesis.clone())
        })
    }
}

/// Hub that resolves every key to a fictitious path, except those marked missing.
#[derive(Debug, Default)]
pub struct MockModelHub {
    missing: RwLock<HashSet<String>>,
    resolves: AtomicUsize,
}

impl MockModelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `name` unresolvable.
    pub async fn remove_model(&self, name: &str) {
        self.missing.write().await.insert(name.to_string());
    }

    pub async fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelHub for MockModelHub {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, key: &ModelKey) -> Result<PathBuf, ModelError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.missing.read().await.contains(&key.name) {
            return Err(ModelError::unavailable(key, "not published"));
        }
        Ok(PathBuf::from("/mock/models")
            .join(&key.name)
            .join(key.version.dir_name())
            .join("model.safetensors"))
    }
}
