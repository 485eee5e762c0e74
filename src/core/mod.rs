//! Core domain types.
//!
//! Jobs, schedules, cron expressions, and execution history rows shared by
//! the scheduler, executor, and management surface.

pub mod cron;
pub mod history;
pub mod job;
pub mod retry;
pub mod schedule;
pub mod types;

pub use cron::{CronError, CronExpr};
pub use history::{ExecutionHistory, ExecutionStatus, TaskRef, TaskRefError};
pub use job::{Job, JobError, DEFAULT_TIMEOUT_SECS};
pub use retry::{RetryCondition, RetryPolicy};
pub use schedule::{Schedule, ScheduleError};
pub use types::{HistoryId, JobId, ScheduleId};
