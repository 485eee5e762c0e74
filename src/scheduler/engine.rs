//! Scheduler engine.
//!
//! A fixed-interval polling loop over the schedule table. Each tick fires
//! every due schedule exactly once: open a Running history row, enqueue a
//! task referencing it, then advance the schedule's `next_execution` past
//! now. The engine also runs the reconciliation sweep that fails history
//! rows stuck in Running, and serves handle commands (manual trigger,
//! pause/resume, shutdown).
//!
//! Schedules that came due several times while the scheduler was down or
//! paused still fire only once: firing is driven by `next_execution <= now`,
//! and the advance step jumps straight past `now`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::{ExecutionHistory, HistoryId, JobId, Schedule, TaskRef};
use crate::notify::Notifier;
use crate::queue::TaskQueue;
use crate::storage::{Storage, StorageError};

use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::types::{SchedulerCommand, SchedulerError, SchedulerState};

/// Default polling period for due schedules.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default period of the reconciliation sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default age before a Running history row counts as stuck.
const STUCK_THRESHOLD: Duration = Duration::from_secs(600);

/// The schedule polling engine.
///
/// Owns all schedule mutation: nothing else advances `next_execution` or
/// deactivates a schedule. Shares storage and queue handles with the rest
/// of the system.
pub struct Scheduler {
    storage: Arc<dyn Storage>,
    queue: Arc<dyn TaskQueue>,
    notifier: Arc<dyn Notifier>,
    stream: String,
    tick_interval: Duration,
    sweep_interval: Duration,
    stuck_threshold: Duration,
}

impl Scheduler {
    /// Create a scheduler appending tasks to the given stream.
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<dyn TaskQueue>,
        notifier: Arc<dyn Notifier>,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            queue,
            notifier,
            stream: stream.into(),
            tick_interval: TICK_INTERVAL,
            sweep_interval: SWEEP_INTERVAL,
            stuck_threshold: STUCK_THRESHOLD,
        }
    }

    /// Set the polling period for due schedules.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the reconciliation sweep period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set how old a Running row must be before the sweep fails it.
    ///
    /// Must exceed the longest job timeout, or the sweep can seal rows for
    /// work that is still in flight.
    pub fn with_stuck_threshold(mut self, threshold: Duration) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    /// Start the engine loop and return a handle for controlling it.
    ///
    /// The loop stops on [`SchedulerHandle::shutdown`], or when `shutdown`
    /// flips to `true` or its sender is dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let task = tokio::spawn(async move {
            self.run(command_rx, state, shutdown).await;
        });

        (handle, task)
    }

    /// Main engine loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        let mut sweeper = tokio::time::interval(self.sweep_interval);

        tracing::info!(stream = %self.stream, "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *state.read().await == SchedulerState::Running {
                        self.tick(Utc::now()).await;
                    }
                }

                _ = sweeper.tick() => {
                    // The sweep keeps running while paused: it repairs
                    // state, it does not start new work.
                    self.sweep(Utc::now()).await;
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::Trigger { job_id, response } => {
                            let result = self.trigger_job(&job_id).await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Pause { response } => {
                            *state.write().await = SchedulerState::Paused;
                            tracing::info!("Scheduler paused");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Resume { response } => {
                            *state.write().await = SchedulerState::Running;
                            tracing::info!("Scheduler resumed");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { response } => {
                            *state.write().await = SchedulerState::Stopped;
                            let _ = response.send(());
                            break;
                        }
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        *state.write().await = SchedulerState::Stopped;
        tracing::info!("Scheduler stopped");
    }

    /// One polling pass: fire every due schedule once.
    async fn tick(&self, now: DateTime<Utc>) {
        let due = match self.storage.due_schedules(now).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query due schedules");
                return;
            }
        };

        for schedule in due {
            let schedule_id = schedule.id().clone();
            if let Err(e) = self.fire_schedule(schedule, now).await {
                tracing::error!(schedule_id = %schedule_id, error = %e, "Failed to fire schedule");
            }
        }
    }

    /// Fire one due schedule: open a Running history row, enqueue the task,
    /// then advance the schedule past `now`.
    ///
    /// The history insert, the append, and the schedule update are separate
    /// writes. A crash in between leaves either a Running row with no queue
    /// entry, which the sweep eventually fails, or an appended entry with an
    /// un-advanced schedule, which re-fires as duplicate work under the
    /// at-least-once model.
    async fn fire_schedule(
        &self,
        mut schedule: Schedule,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let history =
            ExecutionHistory::new(schedule.job_id().clone(), Some(schedule.id().clone()));
        self.storage.create_history(history.clone()).await?;

        let payload = TaskRef::for_history(&history).to_bytes();
        if let Err(e) = self.queue.append(&self.stream, &payload).await {
            // Seal the row and leave next_execution untouched so the next
            // tick tries this schedule again.
            let mut failed = history;
            failed.mark_failed(format!("enqueue failed: {e}"));
            self.storage.update_history(failed).await?;
            return Err(e.into());
        }

        tracing::info!(
            schedule_id = %schedule.id(),
            job_id = %schedule.job_id(),
            history_id = %history.id,
            "Enqueued scheduled task"
        );

        match schedule.advance(now) {
            Ok(next) => {
                tracing::debug!(
                    schedule_id = %schedule.id(),
                    next_execution = %next,
                    "Advanced schedule"
                );
                self.storage.update_schedule(schedule).await?;
            }
            Err(e) => {
                // The expression was validated at creation, so failing to
                // parse now means the stored row is corrupt. Deactivate it
                // rather than re-firing it every tick.
                let schedule_id = schedule.id().clone();
                tracing::error!(
                    schedule_id = %schedule_id,
                    expression = %schedule.expression(),
                    error = %e,
                    "Cron advance failed, deactivating schedule"
                );
                schedule.set_active(false);
                self.storage.update_schedule(schedule).await?;
                self.alert(&format!(
                    "Schedule {schedule_id} deactivated: cron advance failed: {e}"
                ))
                .await;
            }
        }

        Ok(())
    }

    /// Enqueue a job directly, bypassing its schedules.
    async fn trigger_job(&self, job_id: &JobId) -> Result<HistoryId, SchedulerError> {
        // Resolve first so an unknown id fails the caller, not the worker.
        let job = self.storage.get_job(job_id).await.map_err(|e| match e {
            StorageError::NotFound(_) => SchedulerError::JobNotFound(job_id.to_string()),
            other => SchedulerError::Storage(other),
        })?;

        let history = ExecutionHistory::new(job.id().clone(), None);
        self.storage.create_history(history.clone()).await?;

        let payload = TaskRef::for_history(&history).to_bytes();
        if let Err(e) = self.queue.append(&self.stream, &payload).await {
            let mut failed = history;
            failed.mark_failed(format!("enqueue failed: {e}"));
            self.storage.update_history(failed).await?;
            return Err(e.into());
        }

        tracing::info!(
            job_id = %job.id(),
            history_id = %history.id,
            "Enqueued manually triggered task"
        );
        Ok(history.id)
    }

    /// Fail Running rows older than the stuck threshold.
    ///
    /// Covers rows orphaned between history creation and the terminal
    /// write: a crash after the insert, or a queue entry trimmed before
    /// delivery. The threshold exceeds every job timeout, so rows for
    /// in-flight work are never swept.
    async fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(self.stuck_threshold.as_secs() as i64);

        let stuck = match self.storage.stuck_histories(cutoff).await {
            Ok(stuck) => stuck,
            Err(e) => {
                tracing::error!(error = %e, "Reconciliation sweep query failed");
                return;
            }
        };

        for mut row in stuck {
            tracing::warn!(
                history_id = %row.id,
                job_id = %row.job_id,
                started_at = %row.started_at,
                "Failing history row stuck in running state"
            );
            row.mark_failed("stuck in running state");
            if let Err(e) = self.storage.update_history(row).await {
                tracing::warn!(error = %e, "Failed to update stuck history row");
            }
        }
    }

    /// Send an operational alert, logging delivery failures.
    async fn alert(&self, text: &str) {
        if let Err(e) = self.notifier.send_message(text).await {
            tracing::warn!(error = %e, "Alert notification failed");
        }
    }
}
