//! Provider gateway: the single door to the market data provider.
//!
//! Order of checks for every call: circuit breaker, rate limiter, timeout.
//! A refused call returns [`ProviderError::CircuitOpen`] without touching the
//! provider; every attempted call reports its outcome to the breaker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::provider::{DataProvider, ProviderError, RankedSymbol};
use super::rate_limiter::SharedRateLimiter;
use crate::circuit_breaker::CircuitBreaker;

/// Shared handle used by the universe cache and by task bodies.
#[derive(Clone)]
pub struct ProviderGateway {
    provider: Arc<dyn DataProvider>,
    breaker: Arc<CircuitBreaker>,
    limiter: SharedRateLimiter,
    call_timeout: Duration,
}

impl ProviderGateway {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        breaker: Arc<CircuitBreaker>,
        limiter: SharedRateLimiter,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            breaker,
            limiter,
            call_timeout,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` against the provider with the default call timeout.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: FnOnce(Arc<dyn DataProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.call_with_timeout(self.call_timeout, op).await
    }

    /// Run `op` against the provider with an explicit timeout.
    pub async fn call_with_timeout<T, F, Fut>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnOnce(Arc<dyn DataProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if !self.breaker.allow_call() {
            tracing::debug!(
                provider = %self.provider.name(),
                "Provider call short-circuited by breaker"
            );
            return Err(ProviderError::CircuitOpen {
                provider: self.provider.name().to_string(),
            });
        }

        self.limiter.acquire().await;

        let result = match tokio::time::timeout(timeout, op(self.provider.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };

        match &result {
            Ok(_) => self.breaker.report_success(),
            Err(e) if e.counts_against_provider() => {
                tracing::warn!(provider = %self.provider.name(), error = %e, "Provider call failed");
                self.breaker.report_failure();
            }
            // The provider answered; only the request was bad.
            Err(_) => self.breaker.report_answered(),
        }

        result
    }

    /// Fetch the ranked active-symbol list through the gateway.
    pub async fn list_ranked_symbols(
        &self,
        timeout: Duration,
    ) -> Result<Vec<RankedSymbol>, ProviderError> {
        self.call_with_timeout(timeout, |provider| async move {
            provider.list_ranked_symbols().await
        })
        .await
    }
}
