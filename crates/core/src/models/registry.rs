//! Process-wide cache of loaded models.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use super::error::ModelError;
use super::handle::{ModelHandle, WeightsSource};
use super::hub::ModelHub;
use super::key::ModelKey;
use super::traits::ModelLoader;

/// Default cap on concurrent calls into one reentrant model.
pub const DEFAULT_MAX_CONCURRENT_PER_MODEL: usize = 4;

/// Lazily loads models and hands out shared handles.
///
/// Loads are single-flight per key: concurrent `acquire` calls for a key that
/// is not yet loaded wait on one load and receive the same handle. Loaded
/// handles stay cached for the lifetime of the registry. A failed load is not
/// cached, so a later `acquire` tries again.
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    hub: Option<Arc<dyn ModelHub>>,
    local_weights: HashMap<ModelKey, PathBuf>,
    max_concurrent_per_model: usize,
    cells: Mutex<HashMap<ModelKey, Arc<OnceCell<ModelHandle>>>>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            hub: None,
            local_weights: HashMap::new(),
            max_concurrent_per_model: DEFAULT_MAX_CONCURRENT_PER_MODEL,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the hub used for keys without local weights.
    pub fn with_hub(mut self, hub: Arc<dyn ModelHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Pins `key` to a local weights file, bypassing the hub.
    pub fn with_local_weights(mut self, key: ModelKey, path: impl Into<PathBuf>) -> Self {
        self.local_weights.insert(key, path.into());
        self
    }

    /// Sets the concurrency cap for reentrant models.
    pub fn with_max_concurrent_per_model(mut self, max: usize) -> Self {
        self.max_concurrent_per_model = max.max(1);
        self
    }

    /// Returns a handle for `key`, loading the model on first use.
    pub async fn acquire(&self, key: &ModelKey) -> Result<ModelHandle, ModelError> {
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(
                cells
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        cell.get_or_try_init(|| self.load(key)).await.cloned()
    }

    /// Keys whose models are currently loaded.
    pub async fn loaded_keys(&self) -> Vec<ModelKey> {
        let cells = self.cells.lock().await;
        let mut keys: Vec<ModelKey> = cells
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_by_key(|k| k.to_string());
        keys
    }

    async fn load(&self, key: &ModelKey) -> Result<ModelHandle, ModelError> {
        let source = match (self.local_weights.get(key), &self.hub) {
            (Some(path), _) => WeightsSource::Local { path: path.clone() },
            (None, Some(hub)) => WeightsSource::Hub {
                hub: hub.name().to_string(),
                path: hub.resolve(key).await?,
            },
            (None, None) => {
                return Err(ModelError::unavailable(
                    key,
                    "no local weights configured and no model hub available",
                ))
            }
        };

        info!("Loading model {} from {}", key, source);
        let started = Instant::now();

        let model = self
            .loader
            .load(key, source.path())
            .await
            .inspect_err(|e| warn!("Failed to load model {}: {}", key, e))?;

        let handle = ModelHandle::new(key.clone(), source, model, self.max_concurrent_per_model);
        info!(
            "Loaded {} model {} in {:?} (concurrency {})",
            handle.kind(),
            key,
            started.elapsed(),
            handle.concurrency_limit()
        );
        Ok(handle)
    }
}
