//! Mock object store for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::storage::{InMemoryObjectStore, ObjectInfo, ObjectStore, StorageError};

/// In-memory object store with injectable failures.
///
/// ```rust,ignore
/// let store = Arc::new(MockObjectStore::new());
/// store.fail_next_puts(2).await; // two transient failures, then success
/// ```
#[derive(Debug, Default)]
pub struct MockObjectStore {
    inner: InMemoryObjectStore,
    /// Remaining puts that fail transiently.
    failing_puts: RwLock<u32>,
    /// If set, every put fails permanently with this reason.
    broken: RwLock<Option<String>>,
    put_calls: AtomicU64,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` puts fail with a transient error.
    pub async fn fail_next_puts(&self, n: u32) {
        *self.failing_puts.write().await = n;
    }

    /// Makes every put fail permanently until cleared with `None`.
    pub async fn set_broken(&self, reason: Option<&str>) {
        *self.broken.write().await = reason.map(str::to_string);
    }

    /// Number of put calls, including failed ones.
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.keys().await
    }

    /// Stored keys under `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.inner
            .keys()
            .await
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn put(&self, key: &str, data: Vec<u8>, checksum: &str) -> Result<(), StorageError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.broken.read().await.clone() {
            return Err(StorageError::failed(reason));
        }
        {
            let mut failing = self.failing_puts.write().await;
            if *failing > 0 {
                *failing -= 1;
                return Err(StorageError::transient(format!("simulated timeout writing {}", key)));
            }
        }

        self.inner.put(key, data, checksum).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        self.inner.head(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}
