//! Job orchestration: admission, the stage DAG and job state.

mod config;
mod error;
mod orchestrator;
mod pool;
mod runner;
mod types;
mod uploads;

pub use config::{JobConfig, OrchestratorConfig};
pub use error::{OrchestratorError, Rejection};
pub use orchestrator::PipelineOrchestrator;
pub use pool::WorkerPool;
pub use types::{
    ArtifactManifest, Diagnostics, DroppedCounts, ErrorKind, Job, JobFailure, JobId, JobOutcome,
    JobRequest, JobResult, JobStatus, PipelineState, PoolStatus, Stage, StageCounts, StageSummary,
    StateTransition, MAX_JOB_ID_LEN,
};
