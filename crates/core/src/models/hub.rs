//! Model hubs: where weights are resolved from.
//!
//! Both hubs share one layout, `{root}/{name}/{latest|v<version>}/<weights>`.
//! For `latest`, a `latest` directory wins; otherwise the highest `v*` directory
//! is used.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::ObjectStore;

use super::error::ModelError;
use super::key::{ModelKey, ModelVersion};

/// Recognised weight file extensions.
pub const MODEL_EXTENSIONS: &[&str] = &["pth", "pt", "bin", "safetensors", "onnx"];

/// Resolves a model key to a local weights file.
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// Hub name for logging and provenance.
    fn name(&self) -> &str;

    /// Returns a local path to the weights of `key`.
    async fn resolve(&self, key: &ModelKey) -> Result<PathBuf, ModelError>;
}

/// Returns true if `file_name` has a recognised weights extension.
pub fn is_weights_file(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| MODEL_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Compares `v`-prefixed version directory names numerically where possible.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts = |s: &str| -> Vec<String> {
        s.trim_start_matches('v')
            .split(['.', '-', '_'])
            .map(str::to_string)
            .collect()
    };
    for (x, y) in parts(a).iter().zip(parts(b).iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    parts(a).len().cmp(&parts(b).len())
}

/// Picks the version directory for `version` among `available` directory names.
pub fn select_version_dir<I>(version: &ModelVersion, available: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let available: Vec<String> = available.into_iter().collect();
    let wanted = version.dir_name();
    if available.contains(&wanted) {
        return Some(wanted);
    }
    match version {
        ModelVersion::Pinned(_) => None,
        ModelVersion::Latest => available
            .into_iter()
            .filter(|d| d.starts_with('v'))
            .max_by(|a, b| compare_versions(a, b)),
    }
}

/// Hub backed by a local directory tree.
pub struct LocalModelHub {
    root: PathBuf,
}

impl LocalModelHub {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn list_dir(path: &Path, dirs: bool) -> std::io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() == dirs {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl ModelHub for LocalModelHub {
    fn name(&self) -> &str {
        "local"
    }

    async fn resolve(&self, key: &ModelKey) -> Result<PathBuf, ModelError> {
        let model_dir = self.root.join(&key.name);
        let versions = Self::list_dir(&model_dir, true).await.map_err(|e| {
            ModelError::unavailable(key, format!("{}: {}", model_dir.display(), e))
        })?;

        let version_dir = select_version_dir(&key.version, versions).ok_or_else(|| {
            ModelError::unavailable(key, format!("no matching version in {}", model_dir.display()))
        })?;
        let dir = model_dir.join(&version_dir);

        let files = Self::list_dir(&dir, false)
            .await
            .map_err(|e| ModelError::unavailable(key, format!("{}: {}", dir.display(), e)))?;
        let weights = files
            .into_iter()
            .find(|f| is_weights_file(f))
            .ok_or_else(|| {
                ModelError::unavailable(
                    key,
                    format!(
                        "no weights file ({}) in {}",
                        MODEL_EXTENSIONS.join(", "),
                        dir.display()
                    ),
                )
            })?;

        debug!("Resolved {} to {}/{}", key, dir.display(), weights);
        Ok(dir.join(weights))
    }
}

/// Hub backed by an object store, caching downloads on local disk.
pub struct ObjectStoreModelHub {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    cache_dir: PathBuf,
}

impl ObjectStoreModelHub {
    /// `prefix` is the key prefix models live under (e.g. "models").
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, cache_dir: PathBuf) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
            cache_dir,
        }
    }

    fn model_prefix(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}/", name)
        } else {
            format!("{}/{}/", self.prefix, name)
        }
    }
}

#[async_trait]
impl ModelHub for ObjectStoreModelHub {
    fn name(&self) -> &str {
        "object_store"
    }

    async fn resolve(&self, key: &ModelKey) -> Result<PathBuf, ModelError> {
        let model_prefix = self.model_prefix(&key.name);
        let keys = self
            .store
            .list(&model_prefix)
            .await
            .map_err(|e| ModelError::unavailable(key, e.to_string()))?;

        // {prefix}/{name}/{version_dir}/{file}
        let entries: Vec<(String, String)> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(&model_prefix))
            .filter_map(|rest| rest.split_once('/'))
            .filter(|(_, file)| !file.contains('/') && is_weights_file(file))
            .map(|(dir, file)| (dir.to_string(), file.to_string()))
            .collect();

        let version_dir = select_version_dir(
            &key.version,
            entries.iter().map(|(dir, _)| dir.clone()),
        )
        .ok_or_else(|| {
            ModelError::unavailable(key, format!("no weights published under {}", model_prefix))
        })?;

        let file = entries
            .iter()
            .filter(|(dir, _)| *dir == version_dir)
            .map(|(_, file)| file.clone())
            .min()
            .ok_or_else(|| ModelError::unavailable(key, "no weights file"))?;

        let local_dir = self.cache_dir.join(&key.name).join(&version_dir);
        let local_path = local_dir.join(&file);
        if tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            debug!("Using cached weights {}", local_path.display());
            return Ok(local_path);
        }

        let object_key = format!("{}{}/{}", model_prefix, version_dir, file);
        info!("Downloading {} for {}", object_key, key);
        let data = self
            .store
            .get(&object_key)
            .await
            .map_err(|e| ModelError::unavailable(key, e.to_string()))?;

        let io_err = |e: std::io::Error| ModelError::unavailable(key, e.to_string());
        tokio::fs::create_dir_all(&local_dir).await.map_err(io_err)?;
        let partial = local_dir.join(format!("{}.part", file));
        tokio::fs::write(&partial, &data).await.map_err(io_err)?;
        tokio::fs::rename(&partial, &local_path).await.map_err(io_err)?;

        Ok(local_path)
    }
}
