//! Outbound notifications.
//!
//! Task bodies publish alert text through a [`Notifier`]. A failed publish is
//! the body's problem to report; it never affects scheduling.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use zero_common::config::NotificationConfig;

/// Destination for alert text.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, text: &str) -> Result<()>;
}

/// Shared notifier handle.
pub type SharedNotifier = Arc<dyn Notifier>;

/// Build the notifier described by the configuration: a webhook when a URL
/// is set, otherwise the log.
pub fn from_config(config: &NotificationConfig) -> SharedNotifier {
    match config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Arc::new(WebhookNotifier::new(url, config.retry_count)),
        None => Arc::new(LogNotifier),
    }
}

// ============================================================================
// Log Notifier
// ============================================================================

/// Writes every message to the log at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, text: &str) -> Result<()> {
        tracing::info!(target: "zero_scanner::alerts", message = %text, "Alert");
        Ok(())
    }
}

// ============================================================================
// Webhook Notifier
// ============================================================================

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Posts `{"text": ...}` to a webhook (Discord/Slack compatible).
pub struct WebhookNotifier {
    url: String,
    retry_count: u32,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, retry_count: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            url: url.into(),
            retry_count: retry_count.max(1),
            client,
        }
    }

    async fn try_send(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { text })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "HTTP {}: {}",
                status,
                zero_common::util::truncate_with_ellipsis(&error_text, 200)
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, text: &str) -> Result<()> {
        let mut last_error = None;

        for attempt in 1..=self.retry_count {
            match self.try_send(text).await {
                Ok(()) => {
                    tracing::debug!(attempt, "Webhook notification sent");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry_count,
                        error = %e,
                        "Failed to send notification"
                    );
                    last_error = Some(e);
                    if attempt < self.retry_count {
                        tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown error")))
    }
}
