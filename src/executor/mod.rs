//! Task consumption and execution.
//!
//! Executor workers pull one entry at a time from the task stream's consumer
//! group, resolve the referenced [`Job`] and its [`Strategy`], and run it
//! under the job's timeout. Every attempt is recorded as an
//! [`ExecutionHistory`] row: one Running insert followed by exactly one
//! terminal update.
//!
//! Entries are acknowledged and deleted once their outcome can never change
//! (success, or a failure no retry can fix). Transient failures leave the
//! entry pending so the reclaim loop in [`reclaim`] can re-drive it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::core::{ExecutionHistory, TaskRef};
use crate::queue::{Delivery, EntryId, QueueError, TaskQueue};
use crate::storage::{Storage, StorageError};
use crate::strategy::StrategyRegistry;

mod reclaim;

pub use reclaim::RetryLoop;

/// Default time one dequeue call parks waiting for a delivery.
const DEQUEUE_BLOCK: Duration = Duration::from_secs(2);

/// Pause after a failed cycle so an unreachable broker is not hammered.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Errors that can occur while consuming and executing tasks.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Queue operation failed; the current cycle is abandoned and the
    /// entry stays pending for redelivery.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Storage failed while loading a job or writing history.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome of processing one delivered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The strategy succeeded; Completed history written, entry removed.
    Completed,
    /// Permanent failure; Failed history written, entry removed.
    Failed,
    /// Transient failure; Failed history written, entry left pending so
    /// the reclaim loop can retry it.
    Retrying,
    /// The payload was not a valid task reference; entry removed without
    /// touching history.
    Discarded,
}

/// Runs a single delivered entry through lookup, execution, and the
/// terminal history write.
///
/// Shared between the [`Executor`] consume loop and the [`RetryLoop`]:
/// both feed deliveries into [`run_delivery`](TaskRunner::run_delivery)
/// and rely on it to settle the entry's queue state.
pub struct TaskRunner {
    queue: Arc<dyn TaskQueue>,
    storage: Arc<dyn Storage>,
    registry: Arc<StrategyRegistry>,
    stream: String,
    group: String,
}

impl TaskRunner {
    /// Create a runner bound to one stream and consumer group.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        storage: Arc<dyn Storage>,
        registry: Arc<StrategyRegistry>,
        stream: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            storage,
            registry,
            stream: stream.into(),
            group: group.into(),
        }
    }

    /// The queue this runner settles entries against.
    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// The stream this runner is bound to.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// The consumer group this runner is bound to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Execute one delivered entry end to end.
    ///
    /// Settles the entry according to the outcome: acknowledged and deleted
    /// for anything terminal, left pending for transient failures. Errors
    /// are returned only for queue/storage faults that abandon the cycle
    /// with the entry still pending.
    pub async fn run_delivery(&self, delivery: &Delivery) -> Result<TaskOutcome, ExecutorError> {
        let task = match TaskRef::from_bytes(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(
                    stream = %self.stream,
                    entry_id = %delivery.id,
                    error = %e,
                    "Discarding malformed task payload"
                );
                self.finish_entry(delivery.id).await?;
                return Ok(TaskOutcome::Discarded);
            }
        };

        let mut history = self.open_attempt(&task, delivery.id).await?;
        let history_id = history.id;

        let job = match self.storage.get_job(&task.job_id).await {
            Ok(job) => job,
            Err(StorageError::NotFound(_)) => {
                history.mark_failed(format!("unknown job: {}", task.job_id));
                self.storage.update_history(history).await?;
                self.finish_entry(delivery.id).await?;
                tracing::warn!(
                    job_id = %task.job_id,
                    history_id = %history_id,
                    "Dropping task for unknown job"
                );
                return Ok(TaskOutcome::Failed);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(strategy) = self.registry.get(job.kind()) else {
            history.mark_failed(format!("no strategy for kind: {}", job.kind()));
            self.storage.update_history(history).await?;
            self.finish_entry(delivery.id).await?;
            tracing::warn!(
                job_id = %job.id(),
                kind = %job.kind(),
                history_id = %history_id,
                "Dropping task with no registered strategy"
            );
            return Ok(TaskOutcome::Failed);
        };

        tracing::debug!(
            job_id = %job.id(),
            history_id = %history_id,
            kind = %job.kind(),
            "Executing task"
        );

        match tokio::time::timeout(job.timeout(), strategy.execute(&job)).await {
            Ok(Ok(output)) => {
                history.mark_completed(output);
                self.storage.update_history(history).await?;
                self.finish_entry(delivery.id).await?;
                tracing::info!(job_id = %job.id(), history_id = %history_id, "Task completed");
                Ok(TaskOutcome::Completed)
            }
            Ok(Err(e)) if e.is_transient() => {
                history.mark_failed(e.to_string());
                self.storage.update_history(history).await?;
                tracing::warn!(
                    job_id = %job.id(),
                    history_id = %history_id,
                    error = %e,
                    "Task failed, leaving entry pending for retry"
                );
                Ok(TaskOutcome::Retrying)
            }
            Ok(Err(e)) => {
                history.mark_failed(e.to_string());
                self.storage.update_history(history).await?;
                self.finish_entry(delivery.id).await?;
                tracing::warn!(
                    job_id = %job.id(),
                    history_id = %history_id,
                    error = %e,
                    "Task failed permanently"
                );
                Ok(TaskOutcome::Failed)
            }
            Err(_) => {
                history.mark_failed(format!("timed out after {:?}", job.timeout()));
                self.storage.update_history(history).await?;
                tracing::warn!(
                    job_id = %job.id(),
                    history_id = %history_id,
                    timeout = ?job.timeout(),
                    "Task timed out, leaving entry pending for retry"
                );
                Ok(TaskOutcome::Retrying)
            }
        }
    }

    /// Resolve the history row this delivery records into.
    ///
    /// A first delivery finds the Running row the producer opened. A
    /// redelivery finds that row already terminal and opens a fresh one
    /// numbered by the queue's delivery count, so each row still receives
    /// exactly one terminal write. A missing row means storage did not
    /// survive alongside the queue; a replacement is opened so the attempt
    /// is recorded rather than dropped.
    async fn open_attempt(
        &self,
        task: &TaskRef,
        entry_id: EntryId,
    ) -> Result<ExecutionHistory, ExecutorError> {
        match self.storage.get_history(task.history_id).await {
            Ok(history) if history.is_terminal() => {
                let attempt = self
                    .queue
                    .pending_info(&self.stream, &self.group, entry_id)
                    .await?;
                let retry = ExecutionHistory::retry_of(&history, attempt);
                self.storage.create_history(retry.clone()).await?;
                tracing::debug!(
                    job_id = %retry.job_id,
                    history_id = %retry.id,
                    attempt,
                    "Opened history row for retry attempt"
                );
                Ok(retry)
            }
            Ok(history) => Ok(history),
            Err(StorageError::NotFound(_)) => {
                let history = ExecutionHistory::new(task.job_id.clone(), task.schedule_id.clone());
                self.storage.create_history(history.clone()).await?;
                tracing::warn!(
                    job_id = %task.job_id,
                    history_id = %history.id,
                    "History row missing for delivery, opened a replacement"
                );
                Ok(history)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Acknowledge and physically remove an entry whose outcome is settled.
    async fn finish_entry(&self, id: EntryId) -> Result<(), ExecutorError> {
        self.queue.acknowledge(&self.stream, &self.group, id).await?;
        self.queue.delete(&self.stream, id).await?;
        Ok(())
    }
}

/// One consume-loop worker.
///
/// Dequeues entries one at a time and hands them to the shared
/// [`TaskRunner`]. Several workers with distinct consumer names can share
/// one runner; the consumer group guarantees each entry lands on exactly
/// one of them.
pub struct Executor {
    runner: Arc<TaskRunner>,
    consumer: String,
    block: Duration,
}

impl Executor {
    /// Create a worker with the given consumer name.
    pub fn new(runner: Arc<TaskRunner>, consumer: impl Into<String>) -> Self {
        Self {
            runner,
            consumer: consumer.into(),
            block: DEQUEUE_BLOCK,
        }
    }

    /// Override how long each dequeue call blocks waiting for work.
    ///
    /// This bounds shutdown latency: the loop re-checks the shutdown signal
    /// after every dequeue timeout.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Consume until the shutdown signal flips to `true` or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            stream = %self.runner.stream(),
            consumer = %self.consumer,
            "Executor worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = self.poll_once() => {
                    if let Err(e) = result {
                        tracing::error!(
                            consumer = %self.consumer,
                            error = %e,
                            "Executor cycle failed"
                        );
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        }

        tracing::info!(consumer = %self.consumer, "Executor worker stopped");
    }

    /// One dequeue-and-run cycle. An empty poll is not an error.
    async fn poll_once(&self) -> Result<(), ExecutorError> {
        let deliveries = self
            .runner
            .queue()
            .dequeue(
                self.runner.stream(),
                self.runner.group(),
                &self.consumer,
                1,
                self.block,
            )
            .await?;

        for delivery in deliveries {
            self.runner.run_delivery(&delivery).await?;
        }

        Ok(())
    }
}
