//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and single-node
//! deployments. Data is not persisted across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Storage, StorageError};
use crate::core::{ExecutionHistory, ExecutionStatus, HistoryId, Job, JobId, Schedule, ScheduleId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
pub struct InMemoryStorage {
    jobs: RwLock<HashMap<JobId, Job>>,
    schedules: RwLock<HashMap<ScheduleId, Schedule>>,
    histories: RwLock<HashMap<HistoryId, ExecutionHistory>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            schedules: RwLock::new(HashMap::new()),
            histories: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_job(&self, job: Job) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        if jobs.contains_key(job.id()) {
            return Err(StorageError::DuplicateKey(format!("job: {}", job.id())));
        }
        jobs.insert(job.id().clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        result.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        Ok(result)
    }

    async fn update_job(&self, job: Job) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        if !jobs.contains_key(job.id()) {
            return Err(StorageError::NotFound(format!("job: {}", job.id())));
        }
        jobs.insert(job.id().clone(), job);
        Ok(())
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        jobs.remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
        Ok(())
    }

    async fn create_schedule(&self, schedule: Schedule) -> Result<(), StorageError> {
        let mut schedules = self
            .schedules
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if schedules.contains_key(schedule.id()) {
            return Err(StorageError::DuplicateKey(format!(
                "schedule: {}",
                schedule.id()
            )));
        }
        schedules.insert(schedule.id().clone(), schedule);
        Ok(())
    }

    async fn get_schedule(&self, id: &ScheduleId) -> Result<Schedule, StorageError> {
        let schedules = self
            .schedules
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        schedules
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("schedule: {}", id)))
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, StorageError> {
        let schedules = self
            .schedules
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = schedules.values().cloned().collect();
        result.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        Ok(result)
    }

    async fn update_schedule(&self, schedule: Schedule) -> Result<(), StorageError> {
        let mut schedules = self
            .schedules
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if !schedules.contains_key(schedule.id()) {
            return Err(StorageError::NotFound(format!(
                "schedule: {}",
                schedule.id()
            )));
        }
        schedules.insert(schedule.id().clone(), schedule);
        Ok(())
    }

    async fn delete_schedule(&self, id: &ScheduleId) -> Result<(), StorageError> {
        let mut schedules = self
            .schedules
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        schedules
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("schedule: {}", id)))?;
        Ok(())
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, StorageError> {
        let schedules = self
            .schedules
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = schedules
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        Ok(result)
    }

    async fn create_history(&self, history: ExecutionHistory) -> Result<(), StorageError> {
        let mut histories = self
            .histories
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if histories.contains_key(&history.id) {
            return Err(StorageError::DuplicateKey(format!(
                "history: {}",
                history.id
            )));
        }
        histories.insert(history.id, history);
        Ok(())
    }

    async fn get_history(&self, id: HistoryId) -> Result<ExecutionHistory, StorageError> {
        let histories = self
            .histories
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        histories
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("history: {}", id)))
    }

    async fn update_history(&self, history: ExecutionHistory) -> Result<(), StorageError> {
        let mut histories = self
            .histories
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if !histories.contains_key(&history.id) {
            return Err(StorageError::NotFound(format!("history: {}", history.id)));
        }
        histories.insert(history.id, history);
        Ok(())
    }

    async fn list_history_for_job(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<ExecutionHistory>, StorageError> {
        let histories = self
            .histories
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = histories
            .values()
            .filter(|h| &h.job_id == job_id)
            .cloned()
            .collect();
        // Most recent first
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn stuck_histories(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ExecutionHistory>, StorageError> {
        let histories = self
            .histories
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let result: Vec<_> = histories
            .values()
            .filter(|h| h.status == ExecutionStatus::Running && h.started_at < older_than)
            .cloned()
            .collect();
        Ok(result)
    }
}
