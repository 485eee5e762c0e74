//! Outbound webhook strategy.
//!
//! [`WebhookStrategy`] delivers the job payload to a downstream HTTP endpoint
//! with a JSON POST. Every call is guarded by the shared rate limiters: the
//! request limiter paces call frequency and the quota limiter charges the
//! per-job `cost` against the per-minute budget before the request is sent.
//! The payload shape:
//!
//! ```json
//! {
//!   "url": "https://hooks.example.com/build",
//!   "body": { "text": "nightly build finished" },
//!   "headers": { "x-api-key": "secret" },
//!   "cost": 5
//! }
//! ```
//!
//! Only `url` is required. When `body` is absent the whole job payload is
//! posted as-is; `cost` defaults to 1. Non-success responses are transient
//! failures, left to the reclaim loop up to the retry ceiling.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Strategy, StrategyError};
use crate::core::Job;
use crate::limiter::{QuotaLimiter, RequestLimiter};

/// Response bodies recorded in history are cut off at this many characters.
const MAX_OUTPUT_CHARS: usize = 2048;

/// Payload contract for [`WebhookStrategy`] jobs.
#[derive(Debug, Deserialize)]
struct WebhookSpec {
    /// Endpoint receiving the POST.
    url: String,
    /// JSON body; the full job payload when absent.
    #[serde(default)]
    body: serde_json::Value,
    /// Extra request headers.
    #[serde(default)]
    headers: HashMap<String, String>,
    /// Quota units this delivery charges.
    #[serde(default = "default_cost")]
    cost: u64,
}

fn default_cost() -> u64 {
    1
}

/// A strategy that POSTs job payloads to an HTTP endpoint.
pub struct WebhookStrategy {
    client: reqwest::Client,
    requests: Arc<RequestLimiter>,
    quota: Arc<QuotaLimiter>,
}

impl WebhookStrategy {
    /// Job kind tag handled by this strategy.
    pub const KIND: &'static str = "webhook";

    /// Create a webhook strategy guarded by the given limiters.
    pub fn new(requests: Arc<RequestLimiter>, quota: Arc<QuotaLimiter>) -> Self {
        Self {
            client: reqwest::Client::new(),
            requests,
            quota,
        }
    }

    /// Replace the HTTP client (custom timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl Strategy for WebhookStrategy {
    fn kind(&self) -> &str {
        Self::KIND
    }

    async fn execute(&self, job: &Job) -> Result<String, StrategyError> {
        let spec: WebhookSpec = serde_json::from_value(job.payload().clone())
            .map_err(|e| StrategyError::InvalidPayload(e.to_string()))?;

        let body = if spec.body.is_null() {
            job.payload().clone()
        } else {
            spec.body
        };

        // Charge the quota before reserving a request slot so an oversized
        // cost fails fast without burning a token.
        self.quota.acquire(spec.cost).await?;
        self.requests.acquire().await;

        let mut request = self.client.post(&spec.url).json(&body);
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(format!("{} {}", status.as_u16(), truncate(&text)).trim_end().to_string())
        } else {
            Err(StrategyError::Transient(format!(
                "webhook returned {}: {}",
                status,
                truncate(&text)
            )))
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_OUTPUT_CHARS).collect()
}
