use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::extract::MediaConfig;
use crate::models::{InferenceServiceConfig, ModelKey, DEFAULT_MAX_CONCURRENT_PER_MODEL};
use crate::pipeline::{JobConfig, OrchestratorConfig};
use crate::retry::RetryConfig;
use crate::storage::S3Config;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Defaults for jobs submitted without their own configuration.
    #[serde(default)]
    pub pipeline: JobConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Artifact storage configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// S3/MinIO settings (required when backend = "s3")
    #[serde(default)]
    pub s3: Option<S3Config>,
    /// Retry policy for uploads
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Available object store backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    S3,
    #[default]
    Memory,
}

/// Model resolution and inference configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub hub: HubConfig,
    /// Inference sidecar; without it no model can be loaded
    #[serde(default)]
    pub inference: Option<InferenceServiceConfig>,
    /// Concurrent calls allowed into one reentrant model
    #[serde(default = "default_max_concurrent_per_model")]
    pub max_concurrent_per_model: usize,
    /// Models pinned to local weight files, bypassing the hub
    #[serde(default)]
    pub local_weights: Vec<LocalWeights>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            inference: None,
            max_concurrent_per_model: default_max_concurrent_per_model(),
            local_weights: Vec::new(),
        }
    }
}

fn default_max_concurrent_per_model() -> usize {
    DEFAULT_MAX_CONCURRENT_PER_MODEL
}

/// Model hub configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    #[serde(default)]
    pub backend: HubBackend,
    /// Root of the model tree (backend = "local")
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    /// Download cache (backend = "object_store")
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Key prefix models are published under (backend = "object_store")
    #[serde(default = "default_object_prefix")]
    pub object_prefix: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            backend: HubBackend::default(),
            local_dir: default_local_dir(),
            cache_dir: default_cache_dir(),
            object_prefix: default_object_prefix(),
        }
    }
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("avatar-prep-models")
}

fn default_object_prefix() -> String {
    "models".to_string()
}

/// Available model hubs
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HubBackend {
    #[default]
    Local,
    ObjectStore,
}

/// A model pinned to a local weights file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalWeights {
    pub key: ModelKey,
    pub path: PathBuf,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub storage: SanitizedStorageConfig,
    pub models: ModelsConfig,
    pub orchestrator: OrchestratorConfig,
    pub pipeline: JobConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub backend: StorageBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<SanitizedS3Config>,
    pub retry: RetryConfig,
}

/// Sanitized S3 config (credentials hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedS3Config {
    pub bucket: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub prefix: String,
    pub credentials_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            storage: SanitizedStorageConfig {
                backend: config.storage.backend,
                s3: config.storage.s3.as_ref().map(|s3| SanitizedS3Config {
                    bucket: s3.bucket.clone(),
                    region: s3.region.clone(),
                    endpoint: s3.endpoint.clone(),
                    prefix: s3.prefix.clone(),
                    credentials_configured: !s3.access_key_id.is_empty()
                        && !s3.secret_access_key.is_empty(),
                }),
                retry: config.storage.retry.clone(),
            },
            models: config.models.clone(),
            orchestrator: config.orchestrator.clone(),
            pipeline: config.pipeline.clone(),
            media: config.media.clone(),
        }
    }
}
