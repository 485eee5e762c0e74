//! Strategy trait, errors, and the kind registry.
//!
//! A [`Strategy`] is the unit of work behind a job: the executor resolves a
//! strategy by the job's `kind` tag and invokes it with the full job record.
//! Implement this trait to add a new job type; the executor never needs to
//! change.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::Job;
use crate::limiter::LimiterError;

mod command;
mod webhook;

pub use command::CommandStrategy;
pub use webhook::WebhookStrategy;

/// Errors that can occur while executing a job strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Strategy execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Execution exceeded the job's timeout.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// External command exited with a non-zero code.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed {
        /// Exit code reported by the process (-1 if killed by signal).
        code: i32,
        /// Captured standard error output.
        stderr: String,
    },

    /// The job payload is missing or has an invalid field.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Downstream HTTP call failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limiter refused the request.
    #[error("rate limiter: {0}")]
    Limiter(#[from] LimiterError),

    /// A transient error that may succeed on retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StrategyError {
    /// Check if this error is considered transient (worth redelivering).
    ///
    /// Transient failures leave the queue entry pending so the reclaim loop
    /// re-drives it; permanent failures are acknowledged and dropped.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StrategyError::Transient(_) | StrategyError::Timeout(_) | StrategyError::Http(_)
        )
    }
}

/// The core trait for job execution strategies.
///
/// # Example
///
/// ```ignore
/// use relais::{Job, Strategy, StrategyError};
/// use async_trait::async_trait;
///
/// struct ReportStrategy;
///
/// #[async_trait]
/// impl Strategy for ReportStrategy {
///     fn kind(&self) -> &str {
///         "report"
///     }
///
///     async fn execute(&self, job: &Job) -> Result<String, StrategyError> {
///         let table: String = job
///             .payload_field("table")
///             .ok_or_else(|| StrategyError::InvalidPayload("missing table".into()))?;
///         Ok(format!("report built for {table}"))
///     }
/// }
/// ```
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The job `kind` tag this strategy handles.
    fn kind(&self) -> &str;

    /// Execute the job.
    ///
    /// # Returns
    /// * `Ok(output)` - Job completed; the output string is recorded in history
    /// * `Err(StrategyError)` - Job failed
    async fn execute(&self, job: &Job) -> Result<String, StrategyError>;
}

/// Maps job kinds to their strategies.
///
/// Populated once at startup and shared read-only with the executor workers.
/// Registering a second strategy for the same kind replaces the first.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under its own `kind()` tag.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.kind().to_string(), strategy);
    }

    /// Look up the strategy for a job kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(kind).cloned()
    }

    /// Check whether a kind has a registered strategy.
    pub fn contains(&self, kind: &str) -> bool {
        self.strategies.contains_key(kind)
    }

    /// All registered kinds, sorted for stable display.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if no strategies are registered.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
