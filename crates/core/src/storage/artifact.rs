//! Idempotent, checksum-addressed artifact persistence.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::retry::{with_retry, RetryConfig, RetryFailure};

use super::error::StorageError;
use super::traits::ObjectStore;

/// What a `put` did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    /// The key was absent and has been written.
    Written,
    /// Identical content was already stored; nothing was written.
    Unchanged,
    /// Different content was stored and has been replaced.
    Overwritten,
}

/// Result of a successful `put`.
#[derive(Debug, Clone)]
pub struct PutReport {
    pub key: String,
    pub checksum: String,
    pub outcome: PutOutcome,
    pub attempts: u32,
}

/// Persists artifacts with content checksums and bounded retries.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    retry: RetryConfig,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Hex SHA-256 of `data`.
    pub fn checksum(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    /// The underlying object store.
    pub fn backend(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Stores `data` under `key`.
    ///
    /// A put of identical content is a no-op. Different content replaces the
    /// existing object and is reported as [`PutOutcome::Overwritten`].
    pub async fn put(&self, key: &str, data: Vec<u8>) -> Result<PutReport, StorageError> {
        let checksum = Self::checksum(&data);
        let data = &data;
        let sum = checksum.as_str();

        let attempted = with_retry(&self.retry, &format!("put {}", key), move |_| {
            self.put_once(key, data, sum)
        })
        .await
        .map_err(|failure| exhausted(key, failure))?;

        Ok(PutReport {
            key: key.to_string(),
            checksum,
            outcome: attempted.value,
            attempts: attempted.attempts,
        })
    }

    async fn put_once(
        &self,
        key: &str,
        data: &[u8],
        checksum: &str,
    ) -> Result<PutOutcome, StorageError> {
        let outcome = match self.store.head(key).await? {
            Some(info) if info.checksum.as_deref() == Some(checksum) => {
                debug!("{} unchanged, skipping upload", key);
                return Ok(PutOutcome::Unchanged);
            }
            Some(info) => {
                warn!(
                    "Checksum conflict on {}: stored {:?}, writing {}",
                    key, info.checksum, checksum
                );
                PutOutcome::Overwritten
            }
            None => PutOutcome::Written,
        };

        self.store.put(key, data.to_vec(), checksum).await?;
        Ok(outcome)
    }

    /// Reads an artifact, retrying transient failures.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        with_retry(&self.retry, &format!("get {}", key), |_| self.store.get(key))
            .await
            .map(|a| a.value)
            .map_err(|failure| exhausted(key, failure))
    }

    /// Returns true if `key` exists.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        with_retry(&self.retry, &format!("head {}", key), |_| self.store.head(key))
            .await
            .map(|a| a.value.is_some())
            .map_err(|failure| exhausted(key, failure))
    }
}

fn exhausted(key: &str, failure: RetryFailure<StorageError>) -> StorageError {
    if failure.exhausted {
        StorageError::RetriesExhausted {
            key: key.to_string(),
            attempts: failure.attempts,
            reason: failure.error.to_string(),
        }
    } else {
        failure.error
    }
}
