//! Advisory retry policy attached to a job.
//!
//! The core loops do not enforce this policy: redelivery of failed work is
//! driven by the queue's reclaim cycle and its global retry ceiling. The
//! policy travels with the job definition and is surfaced through the
//! management API so operators and custom strategies can act on it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy carried by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts, not including the initial attempt (0 = no retries).
    /// For example, `max_attempts = 3` means up to 3 retries after the initial failure,
    /// for a total of 4 attempts (1 initial + 3 retries).
    pub max_attempts: u32,

    /// Fixed delay between retry attempts.
    #[serde(with = "serde_duration")]
    pub delay: Duration,

    /// Condition for when to retry.
    #[serde(default)]
    pub retry_on: RetryCondition,
}

/// Conditions under which a strategy should retry its downstream call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryCondition {
    /// Retry on any error.
    #[default]
    Always,

    /// Retry only on transient errors (timeouts, resource unavailable).
    TransientOnly,

    /// Never retry, regardless of max_attempts.
    Never,
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
            retry_on: RetryCondition::Never,
        }
    }

    /// Create a policy with fixed delay retries.
    ///
    /// # Arguments
    /// * `max_attempts` - Maximum retry attempts (not including initial try)
    /// * `delay` - Fixed delay between retries
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retry_on: RetryCondition::Always,
        }
    }

    /// Builder: set the retry condition.
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0 && self.retry_on != RetryCondition::Never
    }

    /// Check if another attempt is allowed given the attempts already made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        if self.retry_on == RetryCondition::Never {
            return false;
        }
        attempts < self.max_attempts
    }

    /// Get the delay before the next retry.
    pub fn get_delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as seconds (matching YAML config format).
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
