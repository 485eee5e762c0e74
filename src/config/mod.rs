//! Configuration loading and parsing.
//!
//! YAML-based configuration for the service: backends, loop timings, rate
//! limits, and the jobs and schedules seeded at startup.

mod yaml;

pub use yaml::{
    ConfigError, ExecutorConfig, LimiterConfig, NotifierConfig, NotifierMode, QueueBackend,
    QueueConfig, RetryConfig, SchedulerConfig, ServiceConfig,
};
