//! Operational notifications.
//!
//! The [`Notifier`] trait carries dead-letter reports and scheduler alerts to
//! an operator-facing channel. Delivery is best effort: callers log a failed
//! notification and move on rather than retrying it.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while sending a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP delivery failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiving endpoint rejected the notification.
    #[error("notification rejected with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Sink for operator-facing alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a single alert message.
    async fn send_message(&self, text: &str) -> Result<(), NotifyError>;
}

/// Notifier that writes alerts to the service log.
///
/// The default sink: always available, never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    /// Create a log notifier.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        tracing::warn!("{}", text);
        Ok(())
    }
}

/// Notifier that POSTs alerts to a webhook endpoint.
///
/// The body is `{"text": "..."}`, compatible with common chat-ops incoming
/// webhooks.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Replace the HTTP client (custom timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// The receiving endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected(status))
        }
    }
}
