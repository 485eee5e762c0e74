//! relais - cron-driven job scheduling over a stream queue.
//!
//! Schedules fire jobs into a durable stream consumed by worker loops;
//! every attempt is recorded as an execution history row, and stale
//! deliveries are reclaimed and retried up to a ceiling before being
//! dead-lettered through a notifier.

pub mod api;
pub mod config;
pub mod core;
pub mod executor;
pub mod limiter;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod strategy;
pub mod testing;

pub use config::{ConfigError, ServiceConfig};
pub use core::{
    CronError, CronExpr, ExecutionHistory, ExecutionStatus, HistoryId, Job, JobId, RetryPolicy,
    Schedule, ScheduleId, TaskRef,
};
pub use executor::{Executor, RetryLoop, TaskRunner};
pub use limiter::{QuotaLimiter, RequestLimiter};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use queue::{Delivery, EntryId, InMemoryQueue, QueueError, TaskQueue};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use storage::{InMemoryStorage, Storage, StorageError};
pub use strategy::{CommandStrategy, Strategy, StrategyError, StrategyRegistry, WebhookStrategy};
