//! Job definition.
//!
//! A job names a unit of work: which strategy runs it (`kind`), the payload
//! that strategy interprets, and the timeout bounding a single execution.
//! Scheduling lives on [`Schedule`](super::schedule::Schedule) rows that
//! reference the job by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::retry::RetryPolicy;
use super::types::JobId;

/// Default execution timeout when a job does not set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Errors that can occur when validating a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job id is empty.
    #[error("job id cannot be empty")]
    EmptyId,

    /// Job kind is empty, so no strategy could ever be resolved.
    #[error("job kind cannot be empty")]
    EmptyKind,

    /// Timeout of zero would cancel every execution immediately.
    #[error("job timeout must be greater than zero")]
    ZeroTimeout,
}

/// A job definition.
///
/// Immutable during a single execution; mutated only through the management
/// surface.
#[derive(Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    id: JobId,
    /// Human-readable name.
    name: String,
    /// Type tag resolved against the strategy registry.
    kind: String,
    /// Opaque payload interpreted by the strategy.
    #[serde(default)]
    payload: Value,
    /// Execution timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    /// Advisory retry policy for strategy-internal retries.
    #[serde(default)]
    retry: RetryPolicy,
    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    /// Last modification timestamp.
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Job {
    /// Create a new job with the given id, name, and strategy kind.
    pub fn new(id: impl Into<JobId>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            payload: Value::Null,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the strategy payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the execution timeout in seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the advisory retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the job id.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Get the job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the strategy kind tag.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Get the strategy payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Get a typed field out of an object payload.
    pub fn payload_field<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.payload
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Execution timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the timeout in seconds as configured.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Get the advisory retry policy.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last modification timestamp.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Record a mutation through the management surface.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Validate the job definition.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.id.as_str().is_empty() {
            return Err(JobError::EmptyId);
        }
        if self.kind.is_empty() {
            return Err(JobError::EmptyKind);
        }
        if self.timeout_secs == 0 {
            return Err(JobError::ZeroTimeout);
        }
        Ok(())
    }
}
