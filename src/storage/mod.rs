//! Storage abstraction for jobs, schedules, and execution history.
//!
//! This module provides a trait-based storage abstraction with pluggable
//! backends. The in-memory backend is the reference implementation; database
//! backends plug in behind the same trait.

mod memory;

pub use memory::InMemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::{ExecutionHistory, HistoryId, Job, JobId, Schedule, ScheduleId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Storage trait for persisting scheduler state.
#[async_trait]
pub trait Storage: Send + Sync {
    // Job operations

    /// Create a job. Fails if the id already exists.
    async fn create_job(&self, job: Job) -> Result<(), StorageError>;

    /// Get a job by id.
    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError>;

    /// List all jobs, oldest first.
    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError>;

    /// Replace an existing job.
    async fn update_job(&self, job: Job) -> Result<(), StorageError>;

    /// Delete a job by id.
    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError>;

    // Schedule operations

    /// Create a schedule. Fails if the id already exists.
    async fn create_schedule(&self, schedule: Schedule) -> Result<(), StorageError>;

    /// Get a schedule by id.
    async fn get_schedule(&self, id: &ScheduleId) -> Result<Schedule, StorageError>;

    /// List all schedules, oldest first.
    async fn list_schedules(&self) -> Result<Vec<Schedule>, StorageError>;

    /// Replace an existing schedule.
    async fn update_schedule(&self, schedule: Schedule) -> Result<(), StorageError>;

    /// Delete a schedule by id.
    async fn delete_schedule(&self, id: &ScheduleId) -> Result<(), StorageError>;

    /// All active schedules whose next fire time is unset or has passed.
    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, StorageError>;

    // History operations

    /// Create an execution history row. Fails if the id already exists.
    async fn create_history(&self, history: ExecutionHistory) -> Result<(), StorageError>;

    /// Get a history row by id.
    async fn get_history(&self, id: HistoryId) -> Result<ExecutionHistory, StorageError>;

    /// Replace an existing history row.
    async fn update_history(&self, history: ExecutionHistory) -> Result<(), StorageError>;

    /// List history for a job, most recent first. Returns at most `limit` rows.
    async fn list_history_for_job(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<ExecutionHistory>, StorageError>;

    /// Rows still marked Running that started before `older_than`.
    ///
    /// Feeds the reconciliation sweep that fails rows orphaned by a crash
    /// between history creation and the terminal write.
    async fn stuck_histories(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ExecutionHistory>, StorageError>;
}
