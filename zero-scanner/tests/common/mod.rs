//! Shared fixtures for the scanner integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use zero_scanner::calendar::{Clock, SharedClock, TradingCalendar};
use zero_scanner::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use zero_scanner::data::{shared_limiter, DataProvider, ProviderError, ProviderGateway, RankedSymbol};
use zero_scanner::governor::{ExecutionGovernor, GovernorConfig};
use zero_scanner::notification::LogNotifier;
use zero_scanner::stats::{RunStatsStore, StatsConfig};
use zero_scanner::universe::{UniverseCache, UniverseCacheConfig};

// ============================================================================
// Clocks
// ============================================================================

/// Wall clock that follows tokio's (pausable) clock from a fixed origin.
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}

/// Tuesday 2024-03-05 10:00 in New York.
pub fn market_morning() -> DateTime<Utc> {
    chrono_tz::America::New_York
        .with_ymd_and_hms(2024, 3, 5, 10, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

// ============================================================================
// Mock Provider
// ============================================================================

/// Provider returning `count` symbols ranked by index, optionally slow or failing.
pub struct MockProvider {
    count: usize,
    delay: Duration,
    failing: AtomicBool,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Symbol `i` is named `S{i:04}` and ranked `i`, so the top entries are the
/// highest indices.
pub fn ranked(count: usize) -> Vec<RankedSymbol> {
    (0..count)
        .map(|i| RankedSymbol::new(format!("S{i:04}"), i as f64))
        .collect()
}

#[async_trait]
impl DataProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_ranked_symbols(&self) -> Result<Vec<RankedSymbol>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mock outage".into()));
        }
        Ok(ranked(self.count))
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn gateway(provider: Arc<dyn DataProvider>, clock: SharedClock) -> ProviderGateway {
    gateway_with_breaker(provider, clock, CircuitBreakerConfig::with_name("mock"))
}

pub fn gateway_with_breaker(
    provider: Arc<dyn DataProvider>,
    clock: SharedClock,
    config: CircuitBreakerConfig,
) -> ProviderGateway {
    ProviderGateway::new(
        provider,
        Arc::new(CircuitBreaker::with_clock(config, clock)),
        shared_limiter("mock", 60_000),
        Duration::from_secs(30),
    )
}

pub struct Harness {
    pub clock: SharedClock,
    pub gateway: ProviderGateway,
    pub universe: Arc<UniverseCache>,
    pub stats: Arc<RunStatsStore>,
    pub governor: Arc<ExecutionGovernor>,
}

impl Harness {
    pub fn new(provider: Arc<dyn DataProvider>, max_concurrency: usize, timeout: Duration) -> Self {
        let clock: SharedClock = Arc::new(TokioClock::new(market_morning()));
        let gateway = gateway(provider, clock.clone());
        let universe = Arc::new(UniverseCache::new(
            UniverseCacheConfig::default(),
            gateway.clone(),
        ));
        let stats = Arc::new(RunStatsStore::new(
            StatsConfig::default(),
            TradingCalendar::new_york(),
            clock.clone(),
        ));
        let governor = Arc::new(ExecutionGovernor::new(
            GovernorConfig {
                max_concurrency,
                default_timeout: timeout,
            },
            universe.clone(),
            stats.clone(),
            gateway.clone(),
            Arc::new(LogNotifier),
            clock.clone(),
        ));
        Self {
            clock,
            gateway,
            universe,
            stats,
            governor,
        }
    }
}
