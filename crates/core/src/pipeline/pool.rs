//! Process-wide pool of inference slots for frame tasks.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::types::PoolStatus;

/// Tracks statistics for the pool.
#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
}

impl PoolStats {
    fn to_status(&self, name: &str, max_concurrent: usize, jobs_in_flight: usize) -> PoolStatus {
        PoolStatus {
            name: name.to_string(),
            active_tasks: self.active.load(Ordering::Relaxed) as usize,
            max_concurrent,
            queued_tasks: self.queued.load(Ordering::Relaxed) as usize,
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            jobs_in_flight,
        }
    }
}

/// Bounded set of slots shared by all jobs' frame tasks.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    slots: usize,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
            slots,
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Number of slots.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Tasks waiting for a slot.
    pub fn queue_depth(&self) -> usize {
        self.stats.queued.load(Ordering::Relaxed) as usize
    }

    /// Runs `task` once a slot is free.
    pub async fn run<T, E, F>(&self, task: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        // The semaphore is never closed.
        let permit = self.semaphore.acquire().await.ok();
        self.stats.queued.fetch_sub(1, Ordering::Relaxed);
        self.stats.active.fetch_add(1, Ordering::Relaxed);

        let result = task.await;

        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        self.stats.total_processed.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        }
        drop(permit);
        result
    }

    pub fn status(&self, jobs_in_flight: usize) -> PoolStatus {
        self.stats.to_status("frames", self.slots, jobs_in_flight)
    }
}
