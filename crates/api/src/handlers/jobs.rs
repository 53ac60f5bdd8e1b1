use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use orchestrator_dispatcher::{CreateJobRequest, JobStatusView};
use orchestrator_domain::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, ApiResponse},
    routes::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Serialize)]
pub struct JobCreated {
    pub job_id: JobId,
    pub status: JobStatus,
    pub stages: usize,
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.image.name.trim().is_empty() {
        return Err(ApiError::BadRequest("image name must not be empty".to_string()));
    }
    if request.max_attempts == Some(0) {
        return Err(ApiError::BadRequest(
            "max_attempts must be at least 1".to_string(),
        ));
    }

    let job = state.controller.create_job(request).await?;
    info!(job_id = %job.id, image = %job.image.name, "job submitted");

    Ok(created(JobCreated {
        job_id: job.id,
        status: job.status,
        stages: job.stages.len(),
    }))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<impl IntoResponse> {
    let jobs = state
        .status_service
        .list_jobs(query.include_archived)
        .await?;
    Ok(success(jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let view = state.status_service.query_status(&job_id).await?;
    Ok(success(view))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = state.controller.cancel_job(&job_id).await?;
    Ok(ApiResponse::new(JobStatusView::from(&job)).with_message("job cancelled"))
}

pub async fn archive_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = state.controller.archive_job(&job_id).await?;
    Ok(ApiResponse::new(JobStatusView::from(&job)).with_message("job archived"))
}
