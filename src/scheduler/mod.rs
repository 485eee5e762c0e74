//! Cron-driven scheduling.
//!
//! The [`Scheduler`] polls storage for due schedules and turns each into a
//! queued task plus a Running history row. A [`SchedulerHandle`] controls
//! the running loop: manual triggers, pause/resume, shutdown.

mod engine;
mod handle;
mod types;

pub use engine::Scheduler;
pub use handle::SchedulerHandle;
pub use types::{SchedulerError, SchedulerState};
