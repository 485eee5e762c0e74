//! API response types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{ExecutionHistory, ExecutionStatus, Job, RetryPolicy, Schedule};
use crate::scheduler::SchedulerState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Scheduler state response.
#[derive(Debug, Serialize)]
pub struct SchedulerStateResponse {
    pub state: String,
    pub is_running: bool,
    pub is_paused: bool,
}

impl From<SchedulerState> for SchedulerStateResponse {
    fn from(state: SchedulerState) -> Self {
        Self {
            state: format!("{:?}", state).to_lowercase(),
            is_running: state == SchedulerState::Running,
            is_paused: state == SchedulerState::Paused,
        }
    }
}

/// Job representation in API responses.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id().to_string(),
            name: job.name().to_string(),
            kind: job.kind().to_string(),
            payload: job.payload().clone(),
            timeout_secs: job.timeout_secs(),
            retry: job.retry().clone(),
            created_at: job.created_at(),
            updated_at: job.updated_at(),
        }
    }
}

/// List of jobs response.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub count: usize,
}

/// Schedule representation in API responses.
#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub id: String,
    pub job_id: String,
    pub expression: String,
    pub timezone: String,
    pub active: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Schedule> for ScheduleResponse {
    fn from(schedule: &Schedule) -> Self {
        Self {
            id: schedule.id().to_string(),
            job_id: schedule.job_id().to_string(),
            expression: schedule.expression().to_string(),
            timezone: schedule.timezone().to_string(),
            active: schedule.is_active(),
            next_execution: schedule.next_execution(),
            last_execution: schedule.last_execution(),
            created_at: schedule.created_at(),
            updated_at: schedule.updated_at(),
        }
    }
}

/// List of schedules response.
#[derive(Debug, Serialize)]
pub struct ScheduleListResponse {
    pub schedules: Vec<ScheduleResponse>,
    pub count: usize,
}

/// Execution history row response.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub id: String,
    pub job_id: String,
    pub schedule_id: Option<String>,
    pub attempt: u32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl From<ExecutionHistory> for HistoryResponse {
    fn from(row: ExecutionHistory) -> Self {
        Self {
            id: row.id.to_string(),
            job_id: row.job_id.to_string(),
            schedule_id: row.schedule_id.as_ref().map(|s| s.to_string()),
            attempt: row.attempt,
            status: status_to_string(row.status),
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_ms: row.duration().map(|d| d.num_milliseconds()),
            output: row.output,
            error: row.error_message,
        }
    }
}

fn status_to_string(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
    }
    .to_string()
}

/// List of history rows response.
#[derive(Debug, Serialize)]
pub struct HistoryListResponse {
    pub history: Vec<HistoryResponse>,
    pub count: usize,
}

/// Trigger response.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub history_id: String,
    pub job_id: String,
    pub message: String,
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
