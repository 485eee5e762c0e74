//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::{Job, JobId, Schedule, ScheduleId};
use crate::scheduler::SchedulerHandle;
use crate::storage::{Storage, StorageError};

use super::errors::ApiError;
use super::responses::{
    HealthResponse, HistoryListResponse, HistoryResponse, JobListResponse, JobResponse,
    MessageResponse, ScheduleListResponse, ScheduleResponse, SchedulerStateResponse,
    TriggerResponse,
};

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub handle: SchedulerHandle,
    pub storage: Arc<dyn Storage>,
}

/// Query parameters for the job history endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Partial update body for a schedule.
///
/// The expression can change; the timezone is fixed at creation. Replacing
/// the expression resets `next_execution`, so the schedule re-fires on the
/// next tick.
#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub expression: Option<String>,
    pub active: Option<bool>,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Get scheduler state.
pub async fn scheduler_state(State(state): State<ApiState>) -> Json<SchedulerStateResponse> {
    let scheduler_state = state.handle.state().await;
    Json(SchedulerStateResponse::from(scheduler_state))
}

/// Pause schedule firing.
pub async fn pause_scheduler(
    State(state): State<ApiState>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.pause().await?;
    Ok(Json(MessageResponse {
        message: "scheduler paused".to_string(),
    }))
}

/// Resume schedule firing.
pub async fn resume_scheduler(
    State(state): State<ApiState>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.resume().await?;
    Ok(Json(MessageResponse {
        message: "scheduler resumed".to_string(),
    }))
}

/// List all jobs.
pub async fn list_jobs(State(state): State<ApiState>) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state.storage.list_jobs().await?;
    let jobs: Vec<JobResponse> = jobs.iter().map(JobResponse::from).collect();
    let count = jobs.len();
    Ok(Json(JobListResponse { jobs, count }))
}

/// Create a job.
pub async fn create_job(
    State(state): State<ApiState>,
    Json(job): Json<Job>,
) -> Result<impl IntoResponse, ApiError> {
    job.validate()?;
    let response = JobResponse::from(&job);
    state.storage.create_job(job).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Get a specific job.
pub async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.storage.get_job(&JobId::new(&job_id)).await?;
    Ok(Json(JobResponse::from(&job)))
}

/// Replace a job definition.
pub async fn update_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Json(mut job): Json<Job>,
) -> Result<Json<JobResponse>, ApiError> {
    if job.id().as_str() != job_id {
        return Err(ApiError::BadRequest(format!(
            "job id in body ({}) does not match path ({})",
            job.id(),
            job_id
        )));
    }
    job.validate()?;
    job.touch();
    let response = JobResponse::from(&job);
    state.storage.update_job(job).await?;
    Ok(Json(response))
}

/// Delete a job and the schedules that reference it.
///
/// Leaving the schedules behind would re-fire a missing job forever, each
/// fire failing as "unknown job".
pub async fn delete_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let job_id = JobId::new(&job_id);
    state.storage.delete_job(&job_id).await?;

    let schedules = state.storage.list_schedules().await?;
    for schedule in schedules.iter().filter(|s| s.job_id() == &job_id) {
        if let Err(e) = state.storage.delete_schedule(schedule.id()).await {
            tracing::warn!(
                schedule_id = %schedule.id(),
                error = %e,
                "Failed to delete schedule of removed job"
            );
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Trigger a job outside its schedules.
pub async fn trigger_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let history_id = state.handle.trigger_job(job_id.as_str()).await?;
    Ok(Json(TriggerResponse {
        history_id: history_id.to_string(),
        job_id: job_id.clone(),
        message: format!("job '{}' triggered", job_id),
    }))
}

/// List execution history for a job, most recent first.
pub async fn job_history(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryListResponse>, ApiError> {
    let job_id = JobId::new(&job_id);

    // Verify the job exists so an unknown id is a 404, not an empty list.
    state.storage.get_job(&job_id).await?;

    let rows = state
        .storage
        .list_history_for_job(&job_id, query.limit)
        .await?;
    let history: Vec<HistoryResponse> = rows.into_iter().map(HistoryResponse::from).collect();
    let count = history.len();
    Ok(Json(HistoryListResponse { history, count }))
}

/// List all schedules.
pub async fn list_schedules(
    State(state): State<ApiState>,
) -> Result<Json<ScheduleListResponse>, ApiError> {
    let schedules = state.storage.list_schedules().await?;
    let schedules: Vec<ScheduleResponse> = schedules.iter().map(ScheduleResponse::from).collect();
    let count = schedules.len();
    Ok(Json(ScheduleListResponse { schedules, count }))
}

/// Create a schedule.
pub async fn create_schedule(
    State(state): State<ApiState>,
    Json(schedule): Json<Schedule>,
) -> Result<impl IntoResponse, ApiError> {
    schedule.validate()?;

    // Reject dangling references up front.
    match state.storage.get_job(schedule.job_id()).await {
        Ok(_) => {}
        Err(StorageError::NotFound(_)) => {
            return Err(ApiError::BadRequest(format!(
                "job not found: {}",
                schedule.job_id()
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let response = ScheduleResponse::from(&schedule);
    state.storage.create_schedule(schedule).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Get a specific schedule.
pub async fn get_schedule(
    State(state): State<ApiState>,
    Path(schedule_id): Path<String>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let schedule = state
        .storage
        .get_schedule(&ScheduleId::new(&schedule_id))
        .await?;
    Ok(Json(ScheduleResponse::from(&schedule)))
}

/// Update a schedule's expression or active flag.
pub async fn update_schedule(
    State(state): State<ApiState>,
    Path(schedule_id): Path<String>,
    Json(request): Json<UpdateScheduleRequest>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let mut schedule = state
        .storage
        .get_schedule(&ScheduleId::new(&schedule_id))
        .await?;

    if let Some(expression) = request.expression {
        schedule.set_expression(expression)?;
    }
    if let Some(active) = request.active {
        schedule.set_active(active);
    }

    let response = ScheduleResponse::from(&schedule);
    state.storage.update_schedule(schedule).await?;
    Ok(Json(response))
}

/// Delete a schedule.
pub async fn delete_schedule(
    State(state): State<ApiState>,
    Path(schedule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .storage
        .delete_schedule(&ScheduleId::new(&schedule_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
