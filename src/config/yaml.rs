//! YAML service configuration.
//!
//! One document configures the whole service: queue backend and stream
//! names, loop timings, retry policy, rate limits, notifier, API bind
//! address, and the jobs and schedules seeded into storage at startup.
//! Seed rows deserialize straight into the core types, so the config file
//! and the API speak the same shape.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::api::ApiConfig;
use crate::core::{Job, Schedule};

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Service configuration (relais.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Queue backend and stream naming.
    pub queue: QueueConfig,
    /// Scheduler loop timings.
    pub scheduler: SchedulerConfig,
    /// Worker loop settings.
    pub executor: ExecutorConfig,
    /// Reclaim-and-retry settings.
    pub retry: RetryConfig,
    /// Downstream rate limits shared by strategies.
    pub limiter: LimiterConfig,
    /// Dead-letter and alert notifier.
    pub notifier: NotifierConfig,
    /// Management API bind address.
    pub api: ApiConfig,
    /// Jobs seeded into storage at startup.
    pub jobs: Vec<Job>,
    /// Schedules seeded into storage at startup.
    pub schedules: Vec<Schedule>,
}

/// Queue backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process queue (default, non-durable).
    #[default]
    Memory,
    /// Redis Streams.
    Redis,
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Which backend to use.
    pub backend: QueueBackend,
    /// Connection URL; required for the redis backend.
    pub url: Option<String>,
    /// Stream tasks are appended to.
    pub stream: String,
    /// Consumer group workers dequeue through.
    pub group: String,
    /// Approximate stream length cap for the redis backend.
    pub max_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            url: None,
            stream: "tasks".to_string(),
            group: "workers".to_string(),
            max_len: 10_000,
        }
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Polling period for due schedules, in seconds.
    pub tick_secs: u64,
    /// Reconciliation sweep period, in seconds.
    pub sweep_secs: u64,
    /// Age before a Running history row counts as stuck, in seconds.
    pub stuck_after_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 1,
            sweep_secs: 60,
            stuck_after_secs: 600,
        }
    }
}

impl SchedulerConfig {
    /// Polling period as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// Sweep period as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }

    /// Stuck threshold as a `Duration`.
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }
}

/// Worker loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Consumer name prefix; workers are named `<prefix>-0`, `<prefix>-1`, ...
    pub consumer_prefix: String,
    /// Number of concurrent worker loops.
    pub workers: usize,
    /// How long a dequeue blocks waiting for entries, in seconds.
    pub block_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            consumer_prefix: "worker".to_string(),
            workers: 2,
            block_secs: 2,
        }
    }
}

impl ExecutorConfig {
    /// Dequeue block time as a `Duration`.
    pub fn block(&self) -> Duration {
        Duration::from_secs(self.block_secs)
    }

    /// Consumer name for worker `index`.
    pub fn consumer_name(&self, index: usize) -> String {
        format!("{}-{}", self.consumer_prefix, index)
    }

    /// Consumer name the reclaim loop claims entries under.
    pub fn reclaim_consumer_name(&self) -> String {
        format!("{}-reclaim", self.consumer_prefix)
    }
}

/// Reclaim-and-retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// How often the reclaim loop scans for stale entries, in seconds.
    pub interval_secs: u64,
    /// Minimum idle time before a pending entry is reclaimed, in seconds.
    pub min_idle_secs: u64,
    /// Total delivery ceiling per entry before dead-lettering.
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            min_idle_secs: 60,
            max_retries: 3,
        }
    }
}

impl RetryConfig {
    /// Scan period as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Minimum idle time as a `Duration`.
    pub fn min_idle(&self) -> Duration {
        Duration::from_secs(self.min_idle_secs)
    }
}

/// Downstream rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Request pacing: maximum downstream calls per minute.
    pub requests_per_minute: u32,
    /// Quota budget: maximum cost units spent per minute.
    pub units_per_minute: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            units_per_minute: 100,
        }
    }
}

/// Notifier selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierMode {
    /// Log notifications at error level (default).
    #[default]
    Log,
    /// POST notifications to a webhook.
    Webhook,
}

/// Notifier configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Where notifications go.
    pub mode: NotifierMode,
    /// Webhook URL; required for the webhook mode.
    pub url: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.backend == QueueBackend::Redis && self.queue.url.is_none() {
            return Err(ConfigError::MissingField("queue.url".into()));
        }
        if self.queue.stream.is_empty() {
            return Err(ConfigError::MissingField("queue.stream".into()));
        }
        if self.queue.group.is_empty() {
            return Err(ConfigError::MissingField("queue.group".into()));
        }

        if self.scheduler.tick_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.tick_secs cannot be zero".into(),
            ));
        }
        if self.scheduler.sweep_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.sweep_secs cannot be zero".into(),
            ));
        }
        if self.scheduler.stuck_after_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.stuck_after_secs cannot be zero".into(),
            ));
        }

        if self.executor.workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "executor.workers cannot be zero".into(),
            ));
        }
        if self.executor.block_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "executor.block_secs cannot be zero".into(),
            ));
        }

        if self.retry.max_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_retries cannot be zero".into(),
            ));
        }
        if self.retry.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.interval_secs cannot be zero".into(),
            ));
        }

        if self.limiter.requests_per_minute == 0 {
            return Err(ConfigError::InvalidConfig(
                "limiter.requests_per_minute cannot be zero".into(),
            ));
        }
        if self.limiter.units_per_minute == 0 {
            return Err(ConfigError::InvalidConfig(
                "limiter.units_per_minute cannot be zero".into(),
            ));
        }

        if self.notifier.mode == NotifierMode::Webhook && self.notifier.url.is_none() {
            return Err(ConfigError::MissingField("notifier.url".into()));
        }

        // Catch bind errors at load time instead of panicking at serve time.
        format!("{}:{}", self.api.host, self.api.port)
            .parse::<std::net::SocketAddr>()
            .map_err(|e| ConfigError::InvalidConfig(format!("api.host: {e}")))?;

        self.validate_seeds()
    }

    /// Validate seed jobs and schedules.
    fn validate_seeds(&self) -> Result<(), ConfigError> {
        let mut job_ids: HashSet<&str> = HashSet::new();
        for job in &self.jobs {
            job.validate()
                .map_err(|e| ConfigError::InvalidConfig(format!("job '{}': {e}", job.id())))?;
            if !job_ids.insert(job.id().as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job id: {}",
                    job.id()
                )));
            }
            // A job outliving the stuck threshold would be failed by the
            // sweep while still executing.
            if job.timeout_secs() >= self.scheduler.stuck_after_secs {
                return Err(ConfigError::InvalidConfig(format!(
                    "job '{}' timeout ({}s) must stay below scheduler.stuck_after_secs ({}s)",
                    job.id(),
                    job.timeout_secs(),
                    self.scheduler.stuck_after_secs
                )));
            }
        }

        let mut schedule_ids: HashSet<&str> = HashSet::new();
        for schedule in &self.schedules {
            schedule.validate().map_err(|e| {
                ConfigError::InvalidConfig(format!("schedule '{}': {e}", schedule.id()))
            })?;
            if !schedule_ids.insert(schedule.id().as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate schedule id: {}",
                    schedule.id()
                )));
            }
            if !job_ids.contains(schedule.job_id().as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "schedule '{}' references unknown job '{}'",
                    schedule.id(),
                    schedule.job_id()
                )));
            }
        }

        Ok(())
    }
}
