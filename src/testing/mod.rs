//! Testing utilities for users of the relais library.
//!
//! This module provides fakes for exercising the scheduling pipeline:
//!
//! - [`CountingStrategy`]: Always succeeds, counting invocations
//! - [`FlakyStrategy`]: Fails transiently N times, then succeeds
//! - [`FailingStrategy`]: Always fails, transiently or permanently
//! - [`BlockingStrategy`]: Sleeps before succeeding, for timeout tests
//! - [`RecordingNotifier`]: Captures notification messages

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::Job;
use crate::notify::{Notifier, NotifyError};
use crate::strategy::{Strategy, StrategyError};

/// A strategy that always succeeds and counts its invocations.
pub struct CountingStrategy {
    kind: String,
    output: String,
    calls: AtomicU32,
}

impl CountingStrategy {
    /// Create a counting strategy answering to `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            output: "done".to_string(),
            calls: AtomicU32::new(0),
        }
    }

    /// Set the output reported on success.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// How many times the strategy ran.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for CountingStrategy {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, _job: &Job) -> Result<String, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// A strategy that fails transiently a set number of times, then succeeds.
pub struct FlakyStrategy {
    kind: String,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl FlakyStrategy {
    /// Create a strategy that fails `failures` times before succeeding.
    pub fn new(kind: impl Into<String>, failures: u32) -> Self {
        Self {
            kind: kind.into(),
            failures_remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    /// How many times the strategy ran.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for FlakyStrategy {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, _job: &Job) -> Result<String, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StrategyError::Transient("simulated outage".to_string()));
        }
        Ok("recovered".to_string())
    }
}

/// A strategy that always fails.
pub struct FailingStrategy {
    kind: String,
    transient: bool,
    calls: AtomicU32,
}

impl FailingStrategy {
    /// Create a strategy whose failures are retryable.
    pub fn transient(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            transient: true,
            calls: AtomicU32::new(0),
        }
    }

    /// Create a strategy whose failures are permanent.
    pub fn permanent(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            transient: false,
            calls: AtomicU32::new(0),
        }
    }

    /// How many times the strategy ran.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for FailingStrategy {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, _job: &Job) -> Result<String, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(StrategyError::Transient("still down".to_string()))
        } else {
            Err(StrategyError::ExecutionFailed("broken input".to_string()))
        }
    }
}

/// A strategy that sleeps before succeeding.
///
/// With a delay beyond the job timeout this exercises the timeout path.
pub struct BlockingStrategy {
    kind: String,
    delay: Duration,
}

impl BlockingStrategy {
    /// Create a strategy that sleeps for `delay` before returning.
    pub fn new(kind: impl Into<String>, delay: Duration) -> Self {
        Self {
            kind: kind.into(),
            delay,
        }
    }
}

#[async_trait]
impl Strategy for BlockingStrategy {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, _job: &Job) -> Result<String, StrategyError> {
        tokio::time::sleep(self.delay).await;
        Ok("eventually".to_string())
    }
}

/// A notifier that records every message it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    /// Create an empty recording notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages sent so far, in order.
    pub async fn messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().await.push(text.to_string());
        Ok(())
    }
}
