//! Execution history rows and the queue payload that references them.
//!
//! One row per execution attempt. A row is created in `Running` state when
//! the task is enqueued (before any consumer can see it), and transitions
//! exactly once to `Completed` or `Failed`. Retry attempts get their own
//! rows, so a crash or redelivery never rewrites a terminal outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{HistoryId, JobId, ScheduleId};

/// Status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Enqueued or currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error (including timeout and unresolvable strategy).
    Failed,
}

impl ExecutionStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHistory {
    /// Unique row identifier.
    pub id: HistoryId,
    /// The executed job.
    pub job_id: JobId,
    /// The schedule that fired this attempt; None for direct invocations.
    pub schedule_id: Option<ScheduleId>,
    /// Attempt number: 1 for the initial delivery, then the queue's
    /// delivery count for reclaimed re-runs.
    pub attempt: u32,
    /// Attempt status.
    pub status: ExecutionStatus,
    /// When the attempt was enqueued/started.
    pub started_at: DateTime<Utc>,
    /// When the attempt reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Strategy output (Completed only).
    pub output: Option<String>,
    /// Error text (Failed only).
    pub error_message: Option<String>,
}

impl ExecutionHistory {
    /// Create a new Running row for a schedule fire or direct invocation.
    pub fn new(job_id: JobId, schedule_id: Option<ScheduleId>) -> Self {
        Self {
            id: HistoryId::new(),
            job_id,
            schedule_id,
            attempt: 1,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error_message: None,
        }
    }

    /// Create a fresh Running row for a retry of a finished attempt.
    ///
    /// Keeps the job and schedule references, takes a new identifier, and
    /// records the queue's delivery count as the attempt number.
    pub fn retry_of(previous: &ExecutionHistory, attempt: u32) -> Self {
        Self {
            id: HistoryId::new(),
            job_id: previous.job_id.clone(),
            schedule_id: previous.schedule_id.clone(),
            attempt,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error_message: None,
        }
    }

    /// Whether this row reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the attempt completed with the strategy's output.
    pub fn mark_completed(&mut self, output: impl Into<String>) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output = Some(output.into());
    }

    /// Mark the attempt failed with an error message.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    /// Wall-clock duration, if terminal.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Errors decoding a queue payload into a task reference.
#[derive(Debug, Error)]
pub enum TaskRefError {
    /// The payload bytes are not a valid task reference.
    #[error("malformed task payload: {0}")]
    Malformed(String),
}

/// The queue payload: a reference to the history row an attempt belongs to.
///
/// Serialized as JSON into the entry's single `payload` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    /// The job to execute.
    pub job_id: JobId,
    /// The firing schedule; None for direct invocations.
    pub schedule_id: Option<ScheduleId>,
    /// The Running history row created at enqueue time.
    pub history_id: HistoryId,
}

impl TaskRef {
    /// Build the reference for an enqueued history row.
    pub fn for_history(history: &ExecutionHistory) -> Self {
        Self {
            job_id: history.job_id.clone(),
            schedule_id: history.schedule_id.clone(),
            history_id: history.id,
        }
    }

    /// Serialize to the queue's payload bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // TaskRef has no map keys or non-string values serde_json can
        // reject, so this cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode from payload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TaskRefError> {
        serde_json::from_slice(bytes).map_err(|e| TaskRefError::Malformed(e.to_string()))
    }
}
