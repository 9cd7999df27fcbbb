//! Job, state machine and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::extract::VideoRef;

use super::config::JobConfig;
use super::error::OrchestratorError;

/// Longest accepted job id.
pub const MAX_JOB_ID_LEN: usize = 64;

/// Job identifier. Also the job's object key prefix, so restricted to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Generates a new random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Validates a caller-supplied id.
    pub fn parse(id: impl Into<String>) -> Result<Self, OrchestratorError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_JOB_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(id))
        } else {
            Err(OrchestratorError::InvalidJobId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = OrchestratorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-terminal pipeline phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Extracting,
    Detecting,
    Landmarking,
    Masking,
    UploadingPartial,
    Synthesizing,
    UploadingFinal,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Extracting => "extracting",
            Stage::Detecting => "detecting",
            Stage::Landmarking => "landmarking",
            Stage::Masking => "masking",
            Stage::UploadingPartial => "uploading_partial",
            Stage::Synthesizing => "synthesizing",
            Stage::UploadingFinal => "uploading_final",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A transient error kept failing after all retries.
    TransientExhausted,
    CorruptMedia,
    ModelUnavailable,
    ModelContractViolation,
    InsufficientFrames,
    /// Too many frames were dropped.
    DataQualityError,
    /// Persisting an artifact failed.
    StorageError,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientExhausted => "transient_exhausted",
            ErrorKind::CorruptMedia => "corrupt_media",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::ModelContractViolation => "model_contract_violation",
            ErrorKind::InsufficientFrames => "insufficient_frames",
            ErrorKind::DataQualityError => "data_quality_error",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a job.
///
/// Jobs move strictly forward through the stages; `Failed` is reachable
/// from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineState {
    Queued,
    Extracting,
    Detecting,
    Landmarking,
    Masking,
    UploadingPartial,
    Synthesizing,
    UploadingFinal,
    Completed,
    Failed { kind: ErrorKind, stage: Stage },
}

impl PipelineState {
    /// The state corresponding to a stage.
    pub fn from_stage(stage: Stage) -> Self {
        match stage {
            Stage::Queued => Self::Queued,
            Stage::Extracting => Self::Extracting,
            Stage::Detecting => Self::Detecting,
            Stage::Landmarking => Self::Landmarking,
            Stage::Masking => Self::Masking,
            Stage::UploadingPartial => Self::UploadingPartial,
            Stage::Synthesizing => Self::Synthesizing,
            Stage::UploadingFinal => Self::UploadingFinal,
        }
    }

    /// The stage of a non-terminal state.
    pub fn stage(&self) -> Option<Stage> {
        Some(match self {
            Self::Queued => Stage::Queued,
            Self::Extracting => Stage::Extracting,
            Self::Detecting => Stage::Detecting,
            Self::Landmarking => Stage::Landmarking,
            Self::Masking => Stage::Masking,
            Self::UploadingPartial => Stage::UploadingPartial,
            Self::Synthesizing => Stage::Synthesizing,
            Self::UploadingFinal => Stage::UploadingFinal,
            Self::Completed | Self::Failed { .. } => return None,
        })
    }

    /// Position in the forward ordering. `Failed` ranks after everything.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Extracting => 1,
            Self::Detecting => 2,
            Self::Landmarking => 3,
            Self::Masking => 4,
            Self::UploadingPartial => 5,
            Self::Synthesizing => 6,
            Self::UploadingFinal => 7,
            Self::Completed => 8,
            Self::Failed { .. } => 9,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// Returns true if a job in this state may move to `next`.
    pub fn can_advance_to(&self, next: &PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed { .. } => true,
            _ => next.ordinal() > self.ordinal(),
        }
    }

    /// Returns the state type as a string.
    pub fn state_type(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            other => other.stage().map(|s| s.as_str()).unwrap_or("unknown"),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { kind, stage } => write!(f, "failed({} at {})", kind, stage),
            other => f.write_str(other.state_type()),
        }
    }
}

/// Why and where a job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub message: String,
}

/// Frames dropped per failure category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedCounts {
    pub no_face: usize,
    pub landmark_failed: usize,
    pub mask_failed: usize,
}

impl DroppedCounts {
    pub fn total(&self) -> usize {
        self.no_face + self.landmark_failed + self.mask_failed
    }
}

impl fmt::Display for DroppedCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no_face={}, landmark_failed={}, mask_failed={}",
            self.no_face, self.landmark_failed, self.mask_failed
        )
    }
}

/// Accumulated diagnostics of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub dropped: DroppedCounts,
    /// Transient failures that were retried in place.
    pub transient_retries: u32,
    /// Uploads that replaced different content under the same key.
    pub storage_conflicts: u32,
    /// Uploads skipped because identical content was already stored.
    pub uploads_unchanged: u32,
    /// Output frames cross-faded during synthesis.
    pub smoothed_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One entry of a job's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: PipelineState,
    pub at: DateTime<Utc>,
}

/// Object keys written for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub frames: Vec<String>,
    pub landmarks: Vec<String>,
    pub masks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub manifest: String,
}

/// Counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub total: usize,
    pub succeeded: usize,
    pub dropped: usize,
}

impl StageCounts {
    pub fn new(total: usize, succeeded: usize) -> Self {
        Self {
            total,
            succeeded,
            dropped: total.saturating_sub(succeeded),
        }
    }
}

/// Per-stage counts of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub extraction: StageCounts,
    pub detection: StageCounts,
    pub landmarking: StageCounts,
    pub masking: StageCounts,
    pub synthesis: StageCounts,
}

/// Final summary of a completed job. Written to `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: PipelineState,
    pub manifest: ArtifactManifest,
    pub stages: StageSummary,
    pub diagnostics: Diagnostics,
    /// Seed used for synthesis.
    pub seed: u64,
    pub completed_at: DateTime<Utc>,
}

/// A job as tracked by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub video: VideoRef,
    pub config: JobConfig,
    pub state: PipelineState,
    pub history: Vec<StateTransition>,
    pub diagnostics: Diagnostics,
    /// Frames extracted so far.
    pub total_frames: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl Job {
    pub fn new(id: JobId, video: VideoRef, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            video,
            config,
            state: PipelineState::Queued,
            history: vec![StateTransition {
                state: PipelineState::Queued,
                at: now,
            }],
            diagnostics: Diagnostics::default(),
            total_frames: 0,
            created_at: now,
            updated_at: now,
            result: None,
        }
    }

    /// Moves the job to `next`, rejecting backward moves and changes to terminal jobs.
    pub fn advance(&mut self, next: PipelineState) -> Result<(), OrchestratorError> {
        if !self.state.can_advance_to(&next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        self.history.push(StateTransition { state: next, at: now });
        Ok(())
    }

    /// Dropped frame count.
    pub fn dropped_frames(&self) -> usize {
        self.diagnostics.dropped.total()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.id.clone(),
            state: self.state,
            dropped: self.dropped_frames(),
            total: self.total_frames,
            updated_at: self.updated_at,
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        match (&self.state, &self.result, &self.diagnostics.failure) {
            (PipelineState::Completed, Some(result), _) => JobOutcome::Completed(result.clone()),
            (PipelineState::Failed { .. }, _, Some(failure)) => JobOutcome::Failed(failure.clone()),
            (PipelineState::Failed { kind, stage }, _, None) => JobOutcome::Failed(JobFailure {
                kind: *kind,
                stage: *stage,
                message: kind.to_string(),
            }),
            (state, _, _) => JobOutcome::Pending(*state),
        }
    }
}

/// Point-in-time status of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: PipelineState,
    pub dropped: usize,
    pub total: usize,
    pub updated_at: DateTime<Utc>,
}

/// What `result` returns for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Pending(PipelineState),
    Completed(JobResult),
    Failed(JobFailure),
}

/// A job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub video: VideoRef,
    /// Overrides the orchestrator's default job configuration.
    #[serde(default)]
    pub config: Option<JobConfig>,
    /// Caller-chosen id, e.g. to re-run a finished job.
    #[serde(default)]
    pub job_id: Option<JobId>,
}

impl JobRequest {
    pub fn new(video: VideoRef) -> Self {
        Self {
            video,
            config: None,
            job_id: None,
        }
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_job_id(mut self, id: JobId) -> Self {
        self.job_id = Some(id);
        self
    }
}

/// Status of the frame worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Pool name.
    pub name: String,
    /// Frame tasks currently running.
    pub active_tasks: usize,
    /// Number of inference slots.
    pub max_concurrent: usize,
    /// Frame tasks waiting for a slot.
    pub queued_tasks: usize,
    /// Total tasks finished since startup.
    pub total_processed: u64,
    /// Total tasks that returned an error.
    pub total_failed: u64,
    /// Jobs currently in flight.
    pub jobs_in_flight: usize,
}
