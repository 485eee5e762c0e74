//! Retry loop for stalled queue entries.
//!
//! A pending entry whose consumer crashed, timed out, or hit a transient
//! failure stays claimed but unacknowledged. The retry loop periodically
//! reclaims entries idle past a threshold and re-drives them through the
//! normal execution path. Entries that keep failing are dropped after a
//! delivery ceiling, with a single dead-letter notification; there is no
//! persisted dead-letter store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::core::TaskRef;
use crate::notify::Notifier;
use crate::queue::{Delivery, EntryId};

use super::{ExecutorError, TaskRunner};

/// Default period between reclaim scans.
const RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Default idle time before a pending entry counts as stalled.
const MIN_IDLE: Duration = Duration::from_secs(60);

/// Default delivery ceiling before an entry is dead-lettered.
const MAX_RETRIES: u32 = 3;

/// Periodically reclaims stalled entries on one stream and retries them.
///
/// Runs as its own tokio task next to the executor workers. Claims at most
/// one entry per tick; the queue's reclaim exclusivity guarantees an entry
/// is never won by two loops at once.
pub struct RetryLoop {
    runner: Arc<TaskRunner>,
    notifier: Arc<dyn Notifier>,
    consumer: String,
    interval: Duration,
    min_idle: Duration,
    max_retries: u32,
}

impl RetryLoop {
    /// Create a retry loop claiming entries under the given consumer name.
    pub fn new(
        runner: Arc<TaskRunner>,
        notifier: Arc<dyn Notifier>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            notifier,
            consumer: consumer.into(),
            interval: RETRY_INTERVAL,
            min_idle: MIN_IDLE,
            max_retries: MAX_RETRIES,
        }
    }

    /// Set the period between reclaim scans.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set how long an entry must sit idle before it is reclaimed.
    pub fn with_min_idle(mut self, min_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the delivery ceiling after which an entry is dead-lettered.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Scan until the shutdown signal flips to `true` or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);

        tracing::info!(
            stream = %self.runner.stream(),
            min_idle = ?self.min_idle,
            max_retries = self.max_retries,
            "Retry loop started"
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
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(
                            stream = %self.runner.stream(),
                            error = %e,
                            "Retry cycle failed"
                        );
                    }
                }
            }
        }

        tracing::info!(stream = %self.runner.stream(), "Retry loop stopped");
    }

    /// One reclaim-and-retry cycle.
    ///
    /// Reclaiming bumps the entry's delivery count, so the ceiling check
    /// below counts this claim too: an entry is delivered at most
    /// `max_retries` times in total.
    async fn tick(&self) -> Result<(), ExecutorError> {
        let reclaimed = self
            .runner
            .queue()
            .reclaim_stale(
                self.runner.stream(),
                self.runner.group(),
                &self.consumer,
                self.min_idle,
                EntryId::ZERO,
                1,
            )
            .await?;

        let Some(delivery) = reclaimed.into_iter().next() else {
            return Ok(());
        };

        let deliveries = self
            .runner
            .queue()
            .pending_info(self.runner.stream(), self.runner.group(), delivery.id)
            .await?;

        if deliveries >= self.max_retries {
            return self.dead_letter(&delivery, deliveries).await;
        }

        tracing::info!(
            stream = %self.runner.stream(),
            entry_id = %delivery.id,
            deliveries,
            "Re-running reclaimed task"
        );
        self.runner.run_delivery(&delivery).await?;
        Ok(())
    }

    /// Notify about an entry that exhausted its deliveries, then remove it.
    ///
    /// The entry is removed even when the notification fails; it must never
    /// be delivered again.
    async fn dead_letter(&self, delivery: &Delivery, deliveries: u32) -> Result<(), ExecutorError> {
        let text = match TaskRef::from_bytes(&delivery.payload) {
            Ok(task) => format!(
                "Job {} dropped after {} deliveries without success (stream {}, entry {})",
                task.job_id,
                deliveries,
                self.runner.stream(),
                delivery.id
            ),
            Err(_) => format!(
                "Unparseable task dropped after {} deliveries (stream {}, entry {})",
                deliveries,
                self.runner.stream(),
                delivery.id
            ),
        };

        tracing::error!(
            stream = %self.runner.stream(),
            entry_id = %delivery.id,
            deliveries,
            "Task exceeded retry ceiling, dropping"
        );

        if let Err(e) = self.notifier.send_message(&text).await {
            tracing::warn!(entry_id = %delivery.id, error = %e, "Dead-letter notification failed");
        }

        self.runner.finish_entry(delivery.id).await
    }
}
