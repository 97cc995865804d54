//! Data provider abstraction.
//!
//! The scanner core needs exactly one thing from the market: the list of
//! active symbols with a liquidity ranking key. Every call goes through a
//! [`ProviderGateway`](super::ProviderGateway), which applies the circuit
//! breaker, rate limiting and a timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Ranked Symbol
// ============================================================================

/// One active symbol with its ranking key (typically traded dollar volume).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSymbol {
    pub symbol: String,
    pub rank_key: f64,
}

impl RankedSymbol {
    pub fn new(symbol: impl Into<String>, rank_key: f64) -> Self {
        Self {
            symbol: symbol.into(),
            rank_key,
        }
    }
}

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connection failed or was reset
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid or expired credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Rate limit exceeded on the provider side
    #[error("Rate limited{}", retry_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// The call did not finish within its timeout
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with something we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider is temporarily unavailable (5xx and similar)
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Invalid request parameters (caller side)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The circuit breaker refused the call; the provider was not contacted
    #[error("Circuit open for provider {provider}")]
    CircuitOpen { provider: String },
}

fn retry_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(", retry after {secs} seconds"))
        .unwrap_or_default()
}

impl ProviderError {
    /// Check if the error is recoverable (worth trying again later)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::RateLimited { .. }
                | Self::Timeout(_)
                | Self::Unavailable(_)
                | Self::CircuitOpen { .. }
        )
    }

    /// Whether this outcome says something about the provider's health and
    /// should count against the circuit breaker.
    pub fn counts_against_provider(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_) | Self::CircuitOpen { .. })
    }
}

// ============================================================================
// Data Provider Trait
// ============================================================================

/// Trait for market data providers.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Provider name, used in logs and breaker names
    fn name(&self) -> &str;

    /// Fetch every active symbol with its ranking key. Order is not significant.
    async fn list_ranked_symbols(&self) -> Result<Vec<RankedSymbol>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverability() {
        assert!(ProviderError::Network("reset".into()).is_recoverable());
        assert!(ProviderError::Timeout(Duration::from_secs(15)).is_recoverable());
        assert!(!ProviderError::Auth("bad key".into()).is_recoverable());
        assert!(!ProviderError::InvalidResponse("html".into()).is_recoverable());
    }

    #[test]
    fn test_breaker_accounting() {
        assert!(ProviderError::Auth("bad key".into()).counts_against_provider());
        assert!(ProviderError::RateLimited { retry_after_secs: None }.counts_against_provider());
        assert!(!ProviderError::InvalidRequest("empty".into()).counts_against_provider());
        assert!(!ProviderError::CircuitOpen {
            provider: "snapshot".into()
        }
        .counts_against_provider());
    }

    #[test]
    fn test_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(2),
        };
        assert_eq!(err.to_string(), "Rate limited, retry after 2 seconds");
        let err = ProviderError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "Rate limited");
    }
}
