//! Shared handles to loaded models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::error::ModelError;
use super::key::ModelKey;
use super::traits::{FaceModel, LandmarkModel, SynthesisModel};

/// What kind of model a handle wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Face,
    Landmark,
    Synthesis,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Face => write!(f, "face"),
            Self::Landmark => write!(f, "landmark"),
            Self::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// A loaded model of one of the supported kinds.
#[derive(Clone)]
pub enum LoadedModel {
    Face(Arc<dyn FaceModel>),
    Landmark(Arc<dyn LandmarkModel>),
    Synthesis(Arc<dyn SynthesisModel>),
}

impl LoadedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Face(_) => ModelKind::Face,
            Self::Landmark(_) => ModelKind::Landmark,
            Self::Synthesis(_) => ModelKind::Synthesis,
        }
    }

    pub fn reentrant(&self) -> bool {
        match self {
            Self::Face(m) => m.reentrant(),
            Self::Landmark(m) => m.reentrant(),
            Self::Synthesis(m) => m.reentrant(),
        }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoadedModel::{}", self.kind())
    }
}

/// Where a model's weights came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeightsSource {
    /// Weights pinned to a local path in configuration.
    Local { path: PathBuf },
    /// Weights resolved through a model hub.
    Hub { hub: String, path: PathBuf },
}

impl WeightsSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Local { path } | Self::Hub { path, .. } => path,
        }
    }
}

impl fmt::Display for WeightsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "local weights {}", path.display()),
            Self::Hub { hub, path } => write!(f, "{} hub ({})", hub, path.display()),
        }
    }
}

struct HandleInner {
    key: ModelKey,
    source: WeightsSource,
    model: LoadedModel,
    gate: Semaphore,
    concurrency: usize,
    loaded_at: DateTime<Utc>,
}

/// Cheap-to-clone reference to a loaded model.
///
/// Every inference call goes through [`ModelHandle::gated`], which bounds
/// concurrent calls on this handle (to one for non-reentrant models).
#[derive(Clone)]
pub struct ModelHandle {
    inner: Arc<HandleInner>,
}

impl ModelHandle {
    pub fn new(
        key: ModelKey,
        source: WeightsSource,
        model: LoadedModel,
        max_concurrent: usize,
    ) -> Self {
        let concurrency = if model.reentrant() {
            max_concurrent.max(1)
        } else {
            1
        };
        Self {
            inner: Arc::new(HandleInner {
                key,
                source,
                model,
                gate: Semaphore::new(concurrency),
                concurrency,
                loaded_at: Utc::now(),
            }),
        }
    }

    pub fn key(&self) -> &ModelKey {
        &self.inner.key
    }

    pub fn source(&self) -> &WeightsSource {
        &self.inner.source
    }

    pub fn kind(&self) -> ModelKind {
        self.inner.model.kind()
    }

    /// Maximum concurrent calls allowed on this handle.
    pub fn concurrency_limit(&self) -> usize {
        self.inner.concurrency
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.inner.loaded_at
    }

    /// True if both handles refer to the same loaded instance.
    pub fn same_instance(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn mismatch(&self, expected: ModelKind) -> ModelError {
        ModelError::contract_violation(
            &self.inner.key,
            format!("expected a {} model, loader produced {}", expected, self.kind()),
        )
    }

    pub fn face(&self) -> Result<Arc<dyn FaceModel>, ModelError> {
        match &self.inner.model {
            LoadedModel::Face(m) => Ok(Arc::clone(m)),
            _ => Err(self.mismatch(ModelKind::Face)),
        }
    }

    pub fn landmark(&self) -> Result<Arc<dyn LandmarkModel>, ModelError> {
        match &self.inner.model {
            LoadedModel::Landmark(m) => Ok(Arc::clone(m)),
            _ => Err(self.mismatch(ModelKind::Landmark)),
        }
    }

    pub fn synthesis(&self) -> Result<Arc<dyn SynthesisModel>, ModelError> {
        match &self.inner.model {
            LoadedModel::Synthesis(m) => Ok(Arc::clone(m)),
            _ => Err(self.mismatch(ModelKind::Synthesis)),
        }
    }

    /// Runs `call` inside this handle's concurrency gate.
    pub async fn gated<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire only fails if it were.
        let _permit = self.inner.gate.acquire().await.ok();
        call.await
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("key", &self.inner.key)
            .field("kind", &self.kind())
            .field("source", &self.inner.source)
            .field("concurrency", &self.inner.concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFaceModel, MockLandmarkModel};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn local() -> WeightsSource {
        WeightsSource::Local {
            path: PathBuf::from("/models/face.onnx"),
        }
    }

    #[test]
    fn test_typed_accessors() {
        let handle = ModelHandle::new(
            ModelKey::latest("face"),
            local(),
            LoadedModel::Face(Arc::new(MockFaceModel::new())),
            4,
        );
        assert_eq!(handle.kind(), ModelKind::Face);
        assert!(handle.face().is_ok());
        let err = handle.landmark().err().unwrap();
        assert!(matches!(err, ModelError::ContractViolation { .. }));
    }

    #[test]
    fn test_non_reentrant_gets_single_permit() {
        let model = MockLandmarkModel::new(68).non_reentrant();
        let handle = ModelHandle::new(
            ModelKey::latest("lm"),
            local(),
            LoadedModel::Landmark(Arc::new(model)),
            4,
        );
        assert_eq!(handle.concurrency_limit(), 1);
    }

    #[tokio::test]
    async fn test_gate_serializes_non_reentrant_calls() {
        let model = MockLandmarkModel::new(68).non_reentrant();
        let handle = ModelHandle::new(
            ModelKey::latest("lm"),
            local(),
            LoadedModel::Landmark(Arc::new(model)),
            8,
        );

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..6 {
            let handle = handle.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                handle
                    .gated(async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_instance() {
        let handle = ModelHandle::new(
            ModelKey::latest("face"),
            local(),
            LoadedModel::Face(Arc::new(MockFaceModel::new())),
            2,
        );
        let other = handle.clone();
        assert!(handle.same_instance(&other));
        assert_eq!(handle.source().path(), Path::new("/models/face.onnx"));
    }
}
