//! Scheduler type definitions.
//!
//! Error types, state enum, and the command protocol spoken between
//! [`SchedulerHandle`](super::SchedulerHandle) and the engine loop.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::{HistoryId, JobId};
use crate::queue::QueueError;
use crate::storage::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Manual trigger referenced a job that does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The command channel to the engine loop is broken.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused: schedules do not fire, manual triggers still
    /// work.
    Paused,
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Enqueue a job directly, outside its schedules.
    Trigger {
        job_id: JobId,
        response: oneshot::Sender<Result<HistoryId, SchedulerError>>,
    },
    /// Pause schedule firing.
    Pause { response: oneshot::Sender<()> },
    /// Resume schedule firing.
    Resume { response: oneshot::Sender<()> },
    /// Shut the engine loop down.
    Shutdown { response: oneshot::Sender<()> },
}
