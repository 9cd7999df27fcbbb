//! Job API handlers.

use avatar_prep_core::{
    Diagnostics, Job, JobConfig, JobId, JobOutcome, JobRequest, OrchestratorError,
    PipelineOrchestrator, PipelineState, PoolStatus, StateTransition, VideoRef,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    /// Source video, e.g. `{"path": "/videos/a.mp4"}` or `{"url": "https://..."}`
    pub video: VideoRef,
    /// Overrides the default job configuration
    #[serde(default)]
    pub config: Option<JobConfig>,
    /// Caller-chosen id; re-submitting a finished job's id re-runs it
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Response for an accepted submission
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub state: PipelineState,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by state type (e.g. "completed", "failed", "landmarking")
    pub state: Option<String>,
}

/// Response for job queries
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: JobId,
    pub video: VideoRef,
    pub state: PipelineState,
    pub dropped: usize,
    pub total: usize,
    pub history: Vec<StateTransition>,
    pub diagnostics: Diagnostics,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            dropped: job.dropped_frames(),
            id: job.id,
            video: job.video,
            state: job.state,
            total: job.total_frames,
            history: job.history,
            diagnostics: job.diagnostics,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

/// Response for a cancellation
#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub job_id: JobId,
    pub cancelled: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<JobErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(JobErrorResponse {
            error: error.into(),
        }),
    )
}

fn status_for(e: &OrchestratorError) -> StatusCode {
    match e {
        OrchestratorError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::Rejected(_) => StatusCode::TOO_MANY_REQUESTS,
        OrchestratorError::JobExists(_) => StatusCode::CONFLICT,
        OrchestratorError::JobNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::InvalidJobId(_) | OrchestratorError::InvalidConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        OrchestratorError::InvalidTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<OrchestratorError> for JobErrorResponse {
    fn from(e: OrchestratorError) -> Self {
        Self {
            error: e.to_string(),
        }
    }
}

fn from_orchestrator(e: OrchestratorError) -> ApiError {
    (status_for(&e), Json(JobErrorResponse::from(e)))
}

fn orchestrator(state: &AppState) -> Result<&Arc<PipelineOrchestrator>, ApiError> {
    state.orchestrator().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Pipeline not available. Check that [models.inference] is configured.",
        )
    })
}

fn parse_id(id: String) -> Result<JobId, ApiError> {
    JobId::parse(id).map_err(from_orchestrator)
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new job
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitJobBody>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let orchestrator = orchestrator(&state)?;

    let mut request = JobRequest::new(body.video);
    if let Some(config) = body.config {
        request = request.with_config(config);
    }
    if let Some(id) = body.job_id {
        request = request.with_job_id(parse_id(id)?);
    }

    let job_id = orchestrator
        .submit_job(request)
        .await
        .map_err(from_orchestrator)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            state: PipelineState::Queued,
        }),
    ))
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let orchestrator = orchestrator(&state)?;
    let id = parse_id(id)?;

    let job = orchestrator.job(&id).await.map_err(from_orchestrator)?;
    Ok(Json(JobResponse::from(job)))
}

/// List jobs, oldest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let orchestrator = orchestrator(&state)?;

    let jobs: Vec<JobResponse> = orchestrator
        .list_jobs()
        .await
        .into_iter()
        .filter(|job| {
            params
                .state
                .as_deref()
                .is_none_or(|wanted| job.state.state_type() == wanted)
        })
        .map(JobResponse::from)
        .collect();

    Ok(Json(ListJobsResponse {
        total: jobs.len(),
        jobs,
    }))
}

/// Get a job's outcome. Pending jobs answer 202.
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobOutcome>), ApiError> {
    let orchestrator = orchestrator(&state)?;
    let id = parse_id(id)?;

    let outcome = orchestrator.result(&id).await.map_err(from_orchestrator)?;
    let status = match outcome {
        JobOutcome::Pending(_) => StatusCode::ACCEPTED,
        JobOutcome::Completed(_) | JobOutcome::Failed(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// Cancel a job (DELETE endpoint)
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let orchestrator = orchestrator(&state)?;
    let id = parse_id(id)?;

    if orchestrator.cancel(&id).await.map_err(from_orchestrator)? {
        return Ok(Json(CancelJobResponse {
            job_id: id,
            cancelled: true,
        }));
    }

    let current = orchestrator.status(&id).await.map_err(from_orchestrator)?;
    Err(api_error(
        StatusCode::CONFLICT,
        format!("Cannot cancel job: current state is {}", current.state),
    ))
}

/// Get worker pool status
pub async fn pool_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PoolStatus>, ApiError> {
    let orchestrator = orchestrator(&state)?;
    Ok(Json(orchestrator.pool_status()))
}
