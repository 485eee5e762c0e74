//! Schedule rows: when a job fires.
//!
//! A schedule ties a cron expression to a job. The scheduler polls for due
//! schedules, fires them, and advances `next_execution` through
//! [`Schedule::advance`]. A job may have any number of schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cron::{CronError, CronExpr};
use super::types::{JobId, ScheduleId};

/// Errors that can occur when building or advancing a schedule.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Schedule id is empty.
    #[error("schedule id cannot be empty")]
    EmptyId,

    /// Referenced job id is empty.
    #[error("schedule must reference a job")]
    EmptyJobId,

    /// The cron expression failed to parse or evaluate.
    #[error(transparent)]
    Cron(#[from] CronError),
}

/// A schedule row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique schedule identifier.
    id: ScheduleId,
    /// The job this schedule fires.
    job_id: JobId,
    /// Cron expression (5 or 6 field, shortcuts, @every intervals).
    expression: String,
    /// Timezone the expression is evaluated in.
    #[serde(default = "default_timezone")]
    timezone: String,
    /// Inactive schedules are never due.
    #[serde(default = "default_active")]
    active: bool,
    /// Next fire time; None means "fire on the next tick".
    #[serde(default)]
    next_execution: Option<DateTime<Utc>>,
    /// When this schedule last fired.
    #[serde(default)]
    last_execution: Option<DateTime<Utc>>,
    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    /// Last modification timestamp.
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_active() -> bool {
    true
}

impl Schedule {
    /// Create a new active schedule, validating the cron expression up front.
    pub fn new(
        id: impl Into<ScheduleId>,
        job_id: impl Into<JobId>,
        expression: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        Self::with_timezone(id, job_id, expression, default_timezone())
    }

    /// Create a new active schedule evaluated in a specific timezone.
    pub fn with_timezone(
        id: impl Into<ScheduleId>,
        job_id: impl Into<JobId>,
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        let id = id.into();
        let job_id = job_id.into();
        let expression = expression.into();
        let timezone = timezone.into();

        let now = Utc::now();
        let schedule = Self {
            id,
            job_id,
            expression,
            timezone,
            active: true,
            next_execution: None,
            last_execution: None,
            created_at: now,
            updated_at: now,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Validate the schedule row.
    ///
    /// Deserialization does not validate, so rows arriving through serde
    /// (API bodies, config seeds) must pass through here before storage.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.id.as_str().is_empty() {
            return Err(ScheduleError::EmptyId);
        }
        if self.job_id.as_str().is_empty() {
            return Err(ScheduleError::EmptyJobId);
        }
        self.cron()?;
        Ok(())
    }

    /// Get the schedule id.
    pub fn id(&self) -> &ScheduleId {
        &self.id
    }

    /// Get the job this schedule fires.
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Get the cron expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// Whether the schedule is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Next fire time, if computed.
    pub fn next_execution(&self) -> Option<DateTime<Utc>> {
        self.next_execution
    }

    /// Last fire time, if any.
    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.last_execution
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last modification timestamp.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// A schedule is due when it is active and its next fire time is unset
    /// or has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.next_execution {
            None => true,
            Some(next) => next <= now,
        }
    }

    /// Parse this schedule's cron expression.
    pub fn cron(&self) -> Result<CronExpr, CronError> {
        CronExpr::parse_in_timezone(&self.expression, &self.timezone)
    }

    /// Advance past a successful fire at `now`: `next_execution` moves to
    /// the first occurrence strictly after `now`, `last_execution` records
    /// the fire. `next_execution` strictly increases across successive
    /// fires because each fire happens at or after the previous value.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let next = self.cron()?.next_after(now)?;
        self.next_execution = Some(next);
        self.last_execution = Some(now);
        self.updated_at = now;
        Ok(next)
    }

    /// Activate or deactivate the schedule.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.updated_at = Utc::now();
    }

    /// Replace the cron expression, validating the new one.
    pub fn set_expression(&mut self, expression: impl Into<String>) -> Result<(), ScheduleError> {
        let expression = expression.into();
        CronExpr::parse_in_timezone(&expression, &self.timezone)?;
        self.expression = expression;
        // Next tick recomputes from the new expression
        self.next_execution = None;
        self.updated_at = Utc::now();
        Ok(())
    }
}
