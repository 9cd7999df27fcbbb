//! Object store trait definition.

use async_trait::async_trait;

use super::error::StorageError;

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the content, if it was recorded at upload time.
    pub checksum: Option<String>,
}

/// A flat key/value blob store (S3, MinIO, memory).
///
/// Keys are relative; implementations apply their own prefix.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Writes `data` under `key`, recording `checksum` alongside it.
    async fn put(&self, key: &str, data: Vec<u8>, checksum: &str) -> Result<(), StorageError>;

    /// Reads the object at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Returns object metadata, or `None` if the key is absent.
    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError>;

    /// Lists keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
