//! Job admission, tracking and lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::extract::{FrameExtractor, VideoDecoder};
use crate::models::ModelRegistry;
use crate::storage::ArtifactStore;
use crate::synth::VideoEncoder;

use super::config::{JobConfig, OrchestratorConfig};
use super::error::{OrchestratorError, Rejection};
use super::pool::WorkerPool;
use super::runner::{CancelFlag, JobRunner, PipelineDeps};
use super::types::{
    ErrorKind, Job, JobFailure, JobId, JobOutcome, JobRequest, JobStatus, PipelineState, PoolStatus,
    Stage,
};

/// One entry of the job table.
struct JobSlot {
    updates: Arc<watch::Sender<Job>>,
    cancel: CancelFlag,
}

impl JobSlot {
    fn snapshot(&self) -> Job {
        self.updates.borrow().clone()
    }

    fn is_terminal(&self) -> bool {
        self.updates.borrow().state.is_terminal()
    }
}

/// Admits jobs and drives each one through the pipeline on its own task.
///
/// Jobs share the model registry and the frame worker pool; everything else a
/// job mutates lives in its runner. The job table only holds published
/// snapshots, so status queries never wait on a running stage.
pub struct PipelineOrchestrator {
    deps: Arc<PipelineDeps>,
    default_job_config: JobConfig,
    jobs: Arc<RwLock<HashMap<JobId, JobSlot>>>,
    running: Arc<RwLock<bool>>,
    in_flight: Arc<AtomicUsize>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<ModelRegistry>,
        decoder: Arc<dyn VideoDecoder>,
        artifacts: ArtifactStore,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Self {
        let pool = WorkerPool::new(config.worker_slots);
        Self {
            deps: Arc::new(PipelineDeps {
                registry,
                extractor: FrameExtractor::new(decoder),
                artifacts,
                encoder,
                pool,
                config,
            }),
            default_job_config: JobConfig::default(),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the configuration used for requests that carry none.
    pub fn with_default_job_config(mut self, config: JobConfig) -> Self {
        self.default_job_config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.deps.config
    }

    pub fn default_job_config(&self) -> &JobConfig {
        &self.default_job_config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.deps.registry
    }

    /// Starts accepting jobs.
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Pipeline orchestrator already running");
            return;
        }
        *running = true;
        info!(
            "Pipeline orchestrator started ({} worker slots, {} jobs in flight max)",
            self.deps.config.worker_slots, self.deps.config.max_in_flight_jobs
        );
    }

    /// Stops accepting jobs and cancels the ones still running.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Pipeline orchestrator not running");
                return;
            }
            *running = false;
        }

        let jobs = self.jobs.read().await;
        let mut cancelled = 0;
        for slot in jobs.values().filter(|slot| !slot.is_terminal()) {
            slot.cancel.cancel();
            cancelled += 1;
        }
        info!("Pipeline orchestrator stopped ({} jobs cancelled)", cancelled);
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Admits a job and starts it in the background.
    ///
    /// Over-limit submissions are rejected rather than queued. A caller-chosen
    /// id may reuse the id of a finished job, which replaces it.
    pub async fn submit_job(&self, request: JobRequest) -> Result<JobId, OrchestratorError> {
        if !self.is_running().await {
            return Err(OrchestratorError::NotRunning);
        }

        let config = request
            .config
            .unwrap_or_else(|| self.default_job_config.clone());
        config.validate().map_err(OrchestratorError::InvalidConfig)?;
        let id = request.job_id.unwrap_or_else(JobId::generate);

        let mut jobs = self.jobs.write().await;

        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let limit = self.deps.config.max_in_flight_jobs;
        if in_flight >= limit {
            return Err(OrchestratorError::Rejected(Rejection::TooManyJobs {
                in_flight,
                limit,
            }));
        }
        let depth = self.deps.pool.queue_depth();
        let limit = self.deps.config.max_queue_depth;
        if depth >= limit {
            return Err(OrchestratorError::Rejected(Rejection::QueueFull { depth, limit }));
        }

        if let Some(existing) = jobs.get(&id) {
            if !existing.is_terminal() {
                return Err(OrchestratorError::JobExists(id.to_string()));
            }
            info!("Re-running job {}", id);
        }

        let job = Job::new(id.clone(), request.video, config);
        let (updates, _) = watch::channel(job.clone());
        let updates = Arc::new(updates);
        let cancel = CancelFlag::default();

        let runner = JobRunner::new(
            &job,
            Arc::clone(&self.deps),
            Arc::clone(&updates),
            cancel.clone(),
        );
        jobs.insert(
            id.clone(),
            JobSlot {
                updates: Arc::clone(&updates),
                cancel,
            },
        );
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        drop(jobs);

        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(runner.run()).await {
                error!("Runner for job {} panicked: {}", job.id, e);
                updates.send_modify(|job| {
                    if job.state.is_terminal() {
                        return;
                    }
                    let stage = job.state.stage().unwrap_or(Stage::Queued);
                    job.diagnostics.failure = Some(JobFailure {
                        kind: ErrorKind::Internal,
                        stage,
                        message: format!("runner panicked: {}", e),
                    });
                    let _ = job.advance(PipelineState::Failed {
                        kind: ErrorKind::Internal,
                        stage,
                    });
                });
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        info!("Job {} submitted", id);
        Ok(id)
    }

    /// Current state and frame counters of a job.
    pub async fn status(&self, id: &JobId) -> Result<JobStatus, OrchestratorError> {
        self.job(id).await.map(|job| job.status())
    }

    /// Final result of a job, or its pending state.
    pub async fn result(&self, id: &JobId) -> Result<JobOutcome, OrchestratorError> {
        self.job(id).await.map(|job| job.outcome())
    }

    /// Full snapshot of a job, including its state history.
    pub async fn job(&self, id: &JobId) -> Result<Job, OrchestratorError> {
        let jobs = self.jobs.read().await;
        jobs.get(id)
            .map(JobSlot::snapshot)
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))
    }

    /// Snapshots of all known jobs, oldest first.
    pub async fn list_jobs(&self) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<Job> = jobs.values().map(JobSlot::snapshot).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Signals cancellation. Returns false if the job had already finished.
    pub async fn cancel(&self, id: &JobId) -> Result<bool, OrchestratorError> {
        let jobs = self.jobs.read().await;
        let slot = jobs
            .get(id)
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))?;
        if slot.is_terminal() {
            return Ok(false);
        }
        slot.cancel.cancel();
        info!("Cancellation requested for job {}", id);
        Ok(true)
    }

    /// Resolves once the job reaches a terminal state.
    pub async fn wait(&self, id: &JobId) -> Result<Job, OrchestratorError> {
        let mut receiver = {
            let jobs = self.jobs.read().await;
            jobs.get(id)
                .map(|slot| slot.updates.subscribe())
                .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))?
        };
        let job = receiver
            .wait_for(|job| job.state.is_terminal())
            .await
            .map_err(|_| OrchestratorError::JobNotFound(id.to_string()))?;
        Ok(job.clone())
    }

    /// Worker pool utilisation.
    pub fn pool_status(&self) -> PoolStatus {
        self.deps.pool.status(self.in_flight.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::VideoRef;
    use crate::retry::RetryConfig;
    use crate::storage::InMemoryObjectStore;
    use crate::testing::{MockModelHub, MockModelLoader, MockVideoDecoder, MockVideoEncoder};

    fn orchestrator(config: OrchestratorConfig) -> PipelineOrchestrator {
        let registry = ModelRegistry::new(Arc::new(MockModelLoader::new()))
            .with_hub(Arc::new(MockModelHub::new()));
        PipelineOrchestrator::new(
            config,
            Arc::new(registry),
            Arc::new(MockVideoDecoder::new(2.0, 30.0)),
            ArtifactStore::new(Arc::new(InMemoryObjectStore::new()), RetryConfig::immediate(3)),
            Arc::new(MockVideoEncoder::new()),
        )
        .with_default_job_config(JobConfig::default().with_min_synthesis_frames(2))
    }

    fn request() -> JobRequest {
        JobRequest::new(VideoRef::Path("/videos/a.mp4".into()))
    }

    #[tokio::test]
    async fn test_rejects_when_stopped() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let err = orchestrator.submit_job(request()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotRunning));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator.start().await;
        let err = orchestrator
            .submit_job(request().with_config(JobConfig::default().with_sample_rate(0.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let id = JobId::parse("missing").unwrap();
        assert!(matches!(
            orchestrator.status(&id).await,
            Err(OrchestratorError::JobNotFound(_))
        ));
        assert!(matches!(
            orchestrator.cancel(&id).await,
            Err(OrchestratorError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator.start().await;

        let id = orchestrator.submit_job(request()).await.unwrap();
        let job = orchestrator.wait(&id).await.unwrap();

        assert_eq!(job.state, PipelineState::Completed);
        assert_eq!(job.total_frames, 10);
        assert!(matches!(
            orchestrator.result(&id).await.unwrap(),
            JobOutcome::Completed(_)
        ));
        assert!(!orchestrator.cancel(&id).await.unwrap());
        assert_eq!(orchestrator.pool_status().max_concurrent, 4);
    }

    #[tokio::test]
    async fn test_finished_job_id_can_be_reused() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        orchestrator.start().await;
        let id = JobId::parse("rerun").unwrap();

        orchestrator
            .submit_job(request().with_job_id(id.clone()))
            .await
            .unwrap();
        orchestrator.wait(&id).await.unwrap();

        let again = orchestrator
            .submit_job(request().with_job_id(id.clone()))
            .await
            .unwrap();
        assert_eq!(again, id);
        assert_eq!(orchestrator.wait(&id).await.unwrap().state, PipelineState::Completed);
        assert_eq!(orchestrator.list_jobs().await.len(), 1);
    }
}
