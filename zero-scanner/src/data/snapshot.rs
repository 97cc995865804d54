//! Market-wide snapshot provider (Polygon-compatible REST API).
//!
//! Ranks every ticker in the snapshot by traded dollar volume:
//! `day.v * day.vw`, using `day.c` when the VWAP is missing. Tickers without
//! any volume today fall back to the previous session's bar.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use zero_common::config::ProviderConfig;

use super::provider::{DataProvider, ProviderError, RankedSymbol};

// ============================================================================
// Constants
// ============================================================================

/// All-tickers snapshot endpoint
const SNAPSHOT_ENDPOINT: &str = "/v2/snapshot/locale/us/markets/stocks/tickers";

/// Retry hint returned with a 429
const RATE_LIMIT_RETRY_SECS: u64 = 2;

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tickers: Vec<SnapshotTicker>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotTicker {
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    day: Option<SnapshotBar>,
    #[serde(default, rename = "prevDay")]
    prev_day: Option<SnapshotBar>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotBar {
    #[serde(default)]
    c: Option<f64>,
    #[serde(default)]
    v: Option<f64>,
    #[serde(default)]
    vw: Option<f64>,
}

impl SnapshotBar {
    fn dollar_volume(&self) -> Option<f64> {
        let volume = self.v.filter(|v| *v > 0.0)?;
        let price = self.vw.filter(|p| *p > 0.0).or(self.c)?;
        Some(volume * price)
    }
}

impl SnapshotTicker {
    fn rank_key(&self) -> f64 {
        self.day
            .as_ref()
            .and_then(SnapshotBar::dollar_volume)
            .or_else(|| self.prev_day.as_ref().and_then(SnapshotBar::dollar_volume))
            .unwrap_or(0.0)
    }
}

// ============================================================================
// Snapshot Provider
// ============================================================================

/// HTTP provider for the all-tickers snapshot.
pub struct SnapshotProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl SnapshotProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl DataProvider for SnapshotProvider {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn list_ranked_symbols(&self) -> Result<Vec<RankedSymbol>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("provider API key not configured".into()))?;

        let url = format!("{}{}", self.base_url, SNAPSHOT_ENDPOINT);
        debug!(url = %url, "Fetching market snapshot");

        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", api_key)])
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Network("Request timeout".into())
                } else if e.is_connect() {
                    ProviderError::Network("Connection failed".into())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::Auth(format!("HTTP {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: Some(RATE_LIMIT_RETRY_SECS),
            });
        }
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "HTTP {}: {}",
                status,
                zero_common::util::truncate_with_ellipsis(&body, 200)
            )));
        }

        let payload: SnapshotResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        if payload.status.as_deref() == Some("ERROR") {
            let msg = payload
                .error
                .or(payload.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(ProviderError::InvalidResponse(msg));
        }

        let ranked: Vec<RankedSymbol> = payload
            .tickers
            .iter()
            .filter(|t| !t.ticker.trim().is_empty())
            .map(|t| RankedSymbol::new(t.ticker.trim().to_uppercase(), t.rank_key()))
            .collect();

        debug!(count = ranked.len(), "Market snapshot parsed");
        Ok(ranked)
    }
}
