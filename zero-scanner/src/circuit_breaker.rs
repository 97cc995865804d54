//! Circuit breaker guarding calls to the market data provider.
//!
//! Every caller of the shared data layer (universe rebuilds and task bodies)
//! asks the breaker before a network call and reports the outcome after it.
//! The breaker never performs I/O itself.
//!
//! # States
//!
//! ```text
//! ┌─────────┐   failure_threshold    ┌────────┐
//! │ CLOSED  │ ──────────────────────▶│  OPEN  │◀──────┐
//! │(normal) │  consecutive failures  │(blocked)│       │
//! └─────────┘                        └────────┘       │ probe
//!      ▲                                  │ cooldown   │ failed
//!      │     probe succeeded              ▼ elapsed    │
//!      │                            ┌───────────┐      │
//!      └────────────────────────────│ HALF_OPEN │──────┘
//!                                   │ (1 probe) │
//!                                   └───────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! if !breaker.allow_call() {
//!     return Err(ProviderError::CircuitOpen { provider });
//! }
//! match provider.list_ranked_symbols().await {
//!     Ok(list) => { breaker.report_success(); Ok(list) }
//!     Err(e) => { breaker.report_failure(); Err(e) }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use zero_common::config::CircuitBreakerSettings;

use crate::calendar::{saturating_add, SharedClock, SystemClock};

// ============================================================================
// Circuit Breaker State
// ============================================================================

/// Current state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Tripped - calls short-circuited until the cooldown elapses
    Open,
    /// Cooldown elapsed - exactly one probe call allowed
    HalfOpen,
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed
    pub cooldown: Duration,
    /// Name for logging purposes
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            name: "default".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build from the scanner settings section
    pub fn from_settings(name: impl Into<String>, settings: &CircuitBreakerSettings) -> Self {
        Self::with_name(name)
            .failure_threshold(settings.failure_threshold)
            .cooldown(Duration::from_secs(settings.cooldown_secs))
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the cooldown duration
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

// ============================================================================
// Circuit Breaker Implementation
// ============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_until: Option<DateTime<Utc>>,
    /// When the half-open probe was handed out. A probe whose outcome is never
    /// reported (caller cancelled) is replaced once a cooldown has passed.
    probe_issued_at: Option<DateTime<Utc>>,
    times_opened: u64,
    short_circuited: u64,
}

/// Circuit breaker for protecting provider calls.
///
/// All transitions happen under one mutex; no await point is ever held
/// across it.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker reading time from the system clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, std::sync::Arc::new(SystemClock))
    }

    /// Create a circuit breaker with an explicit clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_until: None,
                probe_issued_at: None,
                times_opened: 0,
                short_circuited: 0,
            }),
        }
    }

    /// Create a circuit breaker with default configuration and a name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new(CircuitBreakerConfig::with_name(name))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.cooldown).unwrap_or_else(|_| chrono::Duration::days(3650))
    }

    /// Ask whether a provider call may be attempted now.
    ///
    /// In the open state this returns `false` until the cooldown elapses; the
    /// first call after that becomes the half-open probe and every other call
    /// is refused until the probe reports back.
    pub fn allow_call(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let until = inner.opened_until.unwrap_or(now);
                if now < until {
                    inner.short_circuited += 1;
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_issued_at = Some(now);
                tracing::info!(
                    circuit = %self.config.name,
                    "Circuit breaker HALF_OPEN, allowing one probe"
                );
                true
            }
            CircuitState::HalfOpen => {
                let lease_expired = inner
                    .probe_issued_at
                    .map_or(true, |issued| now >= issued + self.cooldown());
                if lease_expired {
                    inner.probe_issued_at = Some(now);
                    tracing::debug!(
                        circuit = %self.config.name,
                        "Previous probe never reported, issuing a new one"
                    );
                    true
                } else {
                    inner.short_circuited += 1;
                    false
                }
            }
        }
    }

    /// Record a successful provider call.
    pub fn report_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_until = None;
                inner.probe_issued_at = None;
                tracing::info!(circuit = %self.config.name, "Circuit breaker CLOSED");
            }
            // Late report from a call started before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Record a call the provider answered but rejected for caller reasons
    /// (a bad request). Settles a half-open trial call as healthy; otherwise the
    /// failure count is left alone.
    pub fn report_answered(&self) {
        let state = self.lock().state;
        if state == CircuitState::HalfOpen {
            self.report_success();
        }
    }

    /// Record a failed provider call.
    pub fn report_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                } else {
                    tracing::debug!(
                        circuit = %self.config.name,
                        consecutive_failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker recorded failure"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                self.open(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: DateTime<Utc>) {
        let until = saturating_add(now, self.config.cooldown);
        inner.state = CircuitState::Open;
        inner.opened_until = Some(until);
        inner.probe_issued_at = None;
        inner.times_opened += 1;

        tracing::warn!(
            circuit = %self.config.name,
            consecutive_failures = inner.consecutive_failures,
            cooldown_secs = self.config.cooldown.as_secs(),
            opened_until = %until,
            "Circuit breaker OPENED"
        );
    }

    /// Current state as seen by a caller right now. An open circuit whose
    /// cooldown has elapsed reports `HalfOpen`; no transition is made.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let inner = self.lock();
        match (inner.state, inner.opened_until) {
            (CircuitState::Open, Some(until)) if now >= until => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }

    /// Get statistics about the circuit breaker
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state();
        let inner = self.lock();
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            cooldown_secs: self.config.cooldown.as_secs(),
            opened_until: inner.opened_until,
            times_opened: inner.times_opened,
            short_circuited: inner.short_circuited,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_until = None;
        inner.probe_issued_at = None;
        tracing::info!(circuit = %self.config.name, "Circuit breaker manually reset");
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of a circuit breaker's state
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub opened_until: Option<DateTime<Utc>>,
    /// How many times the circuit has opened since start
    pub times_opened: u64,
    /// Calls refused without contacting the provider
    pub short_circuited: u64,
}

// ============================================================================
// Tests
// ============================================================================
