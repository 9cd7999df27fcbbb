//! Background artifact uploads for one job.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::storage::{
    ArtifactKeys, ArtifactKind, ArtifactStore, PutOutcome, PutReport, StorageError,
};

/// What happened to a job's uploads so far.
#[derive(Debug, Clone, Default)]
pub(crate) struct UploadLedger {
    /// Persisted keys by artifact.
    pub persisted: BTreeMap<ArtifactKind, String>,
    pub conflicts: u32,
    pub unchanged: u32,
    pub retries: u32,
    /// First upload that failed for good.
    pub failure: Option<String>,
}

struct UploadInner {
    artifacts: ArtifactStore,
    keys: ArtifactKeys,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    ledger: Mutex<UploadLedger>,
}

/// Issues uploads as artifacts become available, bounded by a permit count.
#[derive(Clone)]
pub(crate) struct UploadQueue {
    inner: Arc<UploadInner>,
}

impl UploadQueue {
    pub fn new(artifacts: ArtifactStore, keys: ArtifactKeys, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(UploadInner {
                artifacts,
                keys,
                permits: Arc::new(Semaphore::new(concurrency.max(1))),
                tasks: Mutex::new(JoinSet::new()),
                ledger: Mutex::new(UploadLedger::default()),
            }),
        }
    }

    pub fn keys(&self) -> &ArtifactKeys {
        &self.inner.keys
    }

    /// Schedules an upload, waiting while all permits are taken.
    pub async fn enqueue(&self, kind: ArtifactKind, data: Vec<u8>) {
        // The semaphore is never closed.
        let Ok(permit) = Arc::clone(&self.inner.permits).acquire_owned().await else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.lock().await.spawn(async move {
            let key = inner.keys.key_for(kind);
            let result = inner.artifacts.put(&key, data).await;
            drop(permit);
            inner
                .record(kind, &key, result.as_ref().map_err(|e| e.to_string()))
                .await;
        });
    }

    /// Uploads immediately, bypassing the queue.
    pub async fn put_now(
        &self,
        kind: ArtifactKind,
        data: Vec<u8>,
    ) -> Result<PutReport, StorageError> {
        let key = self.inner.keys.key_for(kind);
        let result = self.inner.artifacts.put(&key, data).await;
        self.inner
            .record(kind, &key, result.as_ref().map_err(|e| e.to_string()))
            .await;
        result
    }

    /// Waits for every scheduled upload to finish.
    pub async fn drain(&self) -> UploadLedger {
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                let mut ledger = self.inner.ledger.lock().await;
                ledger
                    .failure
                    .get_or_insert_with(|| format!("upload task failed: {}", e));
            }
        }
        self.ledger().await
    }

    /// Snapshot of the ledger.
    pub async fn ledger(&self) -> UploadLedger {
        self.inner.ledger.lock().await.clone()
    }

    /// First permanent upload failure, if any.
    pub async fn failure(&self) -> Option<String> {
        self.inner.ledger.lock().await.failure.clone()
    }
}

impl UploadInner {
    async fn record(&self, kind: ArtifactKind, key: &str, result: Result<&PutReport, String>) {
        let mut ledger = self.ledger.lock().await;
        match result {
            Ok(report) => {
                ledger.retries += report.attempts.saturating_sub(1);
                match report.outcome {
                    PutOutcome::Overwritten => ledger.conflicts += 1,
                    PutOutcome::Unchanged => ledger.unchanged += 1,
                    PutOutcome::Written => {}
                }
                debug!("Persisted {}", key);
                ledger.persisted.insert(kind, key.to_string());
            }
            Err(reason) => {
                error!("Failed to persist {}: {}", key, reason);
                ledger
                    .failure
                    .get_or_insert_with(|| format!("{}: {}", key, reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use crate::testing::MockObjectStore;

    fn queue(store: Arc<MockObjectStore>, concurrency: usize) -> UploadQueue {
        UploadQueue::new(
            ArtifactStore::new(store, RetryConfig::immediate(3)),
            ArtifactKeys::new("job"),
            concurrency,
        )
    }

    #[tokio::test]
    async fn test_drain_waits_for_uploads() {
        let store = Arc::new(MockObjectStore::new());
        let uploads = queue(store.clone(), 2);
        for i in 0..5 {
            uploads.enqueue(ArtifactKind::Frame(i), vec![i as u8; 16]).await;
        }

        let ledger = uploads.drain().await;
        assert_eq!(ledger.persisted.len(), 5);
        assert!(ledger.failure.is_none());
        assert_eq!(store.keys().await.len(), 5);
        assert_eq!(ledger.persisted[&ArtifactKind::Frame(3)], "jobs/job/frames/frame_0003.raw");
    }

    #[tokio::test]
    async fn test_counts_retries_and_unchanged() {
        let store = Arc::new(MockObjectStore::new());
        let uploads = queue(store.clone(), 1);

        store.fail_next_puts(2).await;
        uploads.enqueue(ArtifactKind::Avatar, b"video".to_vec()).await;
        uploads.drain().await;
        uploads.put_now(ArtifactKind::Avatar, b"video".to_vec()).await.unwrap();

        let ledger = uploads.ledger().await;
        assert_eq!(ledger.retries, 2);
        assert_eq!(ledger.unchanged, 1);
        assert!(ledger.failure.is_none());
    }

    #[tokio::test]
    async fn test_records_permanent_failure() {
        let store = Arc::new(MockObjectStore::new());
        let uploads = queue(store.clone(), 1);

        store.fail_next_puts(5).await;
        uploads.enqueue(ArtifactKind::Mask(0), vec![255; 4]).await;
        let ledger = uploads.drain().await;

        assert!(ledger.failure.unwrap().contains("masks/mask_0000.raw"));
        assert!(ledger.persisted.is_empty());
    }
}
