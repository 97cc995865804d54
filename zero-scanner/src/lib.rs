//! Zero Scanner Library
//!
//! Periodically runs many independent market-scanning tasks against a
//! rate-limited data provider and a shared symbol universe, under strict
//! resource governance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   zero-scanner (Rust Service)                        │
//! │                            :4436                                     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  TaskScheduler ──tick──▶ WindowGate ──eligible──▶ ExecutionGovernor   │
//! │                                                     │ permits/slots  │
//! │                                                     ▼                │
//! │  UniverseCache ◀── task body ──▶ ProviderGateway (breaker, limiter)  │
//! │                                                     │                │
//! │                          RunStatsStore ◀── outcome ─┘                │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most `max_concurrency` task bodies run at once, and never two runs of
//!   the same task.
//! - Every run ends by its deadline from the scheduler's point of view.
//! - At most one universe rebuild is in flight; the snapshot never exceeds the
//!   hard cap.
//! - Nothing raised inside a task body or a provider call reaches the loop.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod calendar;
pub mod circuit_breaker;
pub mod data;
pub mod error;
pub mod governor;
pub mod notification;
pub mod routes;
pub mod scheduler;
pub mod stats;
pub mod task;
pub mod tasks;
pub mod universe;

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use zero_common::config::Config;
use zero_common::Validate;

use crate::calendar::{SharedClock, SystemClock, TradingCalendar};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::data::{shared_limiter, DataProvider, ProviderGateway, SnapshotProvider};
use crate::error::ScanError;
use crate::governor::{ExecutionGovernor, GovernorConfig};
use crate::notification::SharedNotifier;
use crate::scheduler::TaskScheduler;
use crate::stats::{RunStatsStore, StatsConfig};
use crate::task::{TaskBody, TaskCatalog, TaskRegistry, WindowGate};
use crate::tasks::{HeartbeatTask, HEARTBEAT_ENTRYPOINT};
use crate::universe::{UniverseCache, UniverseCacheConfig};

pub use error::{ErrorClass, TaskError};

/// How long shutdown waits for cancelled runs to record their outcome.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Scanner service state shared with the HTTP routes
pub struct ScannerState {
    /// Configuration at start-up
    pub config: Config,
    /// Where reloads read from; `None` means the default path
    pub config_path: Option<PathBuf>,
    pub clock: SharedClock,
    pub registry: Arc<TaskRegistry>,
    pub scheduler: Arc<TaskScheduler>,
    pub governor: Arc<ExecutionGovernor>,
    pub stats: Arc<RunStatsStore>,
    pub universe: Arc<UniverseCache>,
    pub breaker: Arc<CircuitBreaker>,
    pub gateway: ProviderGateway,
    pub notifier: SharedNotifier,
}

impl ScannerState {
    /// Read the configuration again (file plus environment).
    pub fn reload_config(&self) -> Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        config.apply_env_overrides()?;
        Ok(config)
    }
}

/// Assembles a [`ScannerService`]. Anything not supplied comes from the
/// configuration: the snapshot HTTP provider, the system clock, the configured
/// notifier and stats path.
pub struct ScannerServiceBuilder {
    config: Config,
    config_path: Option<PathBuf>,
    provider: Option<Arc<dyn DataProvider>>,
    clock: Option<SharedClock>,
    notifier: Option<SharedNotifier>,
    stats_path: Option<Option<PathBuf>>,
    catalog: TaskCatalog,
}

impl ScannerServiceBuilder {
    pub fn provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Override the stats file; `None` keeps stats in memory only.
    pub fn stats_path(mut self, path: Option<PathBuf>) -> Self {
        self.stats_path = Some(path);
        self
    }

    /// Register a task body under an entrypoint name.
    pub fn task(mut self, entrypoint: impl Into<String>, body: Arc<dyn TaskBody>) -> Self {
        self.catalog.register(entrypoint, body);
        self
    }

    pub fn build(self) -> Result<ScannerService, ScanError> {
        let Self {
            config,
            config_path,
            provider,
            clock,
            notifier,
            stats_path,
            mut catalog,
        } = self;

        config.validate()?;
        let scanner = &config.scanner;

        let clock: SharedClock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let calendar = TradingCalendar::from_config(scanner)?;
        let provider: Arc<dyn DataProvider> =
            provider.unwrap_or_else(|| Arc::new(SnapshotProvider::from_config(&config.provider)));
        if config.provider.api_key.is_none() && provider.name() == "snapshot" {
            tracing::warn!("No provider API key configured; universe will use fallbacks");
        }

        let breaker = Arc::new(CircuitBreaker::with_clock(
            CircuitBreakerConfig::from_settings(provider.name(), &scanner.circuit_breaker),
            clock.clone(),
        ));
        let gateway = ProviderGateway::new(
            provider.clone(),
            breaker.clone(),
            shared_limiter(provider.name(), config.provider.requests_per_minute),
            Duration::from_secs(config.provider.request_timeout_secs),
        );
        let universe = Arc::new(UniverseCache::new(
            UniverseCacheConfig::from(&scanner.universe),
            gateway.clone(),
        ));

        let stats_path = stats_path.unwrap_or_else(|| {
            Some(
                scanner
                    .stats_path
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| zero_common::config::config_dir().join("scanner_stats.json")),
            )
        });
        let stats = Arc::new(RunStatsStore::load(
            StatsConfig {
                path: stats_path,
                history_len: scanner.runtime_history_len,
                retain_days: scanner.stats_retain_days,
            },
            calendar.clone(),
            clock.clone(),
        ));

        let notifier =
            notifier.unwrap_or_else(|| notification::from_config(&config.notification));

        if catalog.get(HEARTBEAT_ENTRYPOINT).is_none() {
            catalog.register(HEARTBEAT_ENTRYPOINT, Arc::new(HeartbeatTask::new(stats.clone())));
        }
        let registry = Arc::new(TaskRegistry::from_config(&config)?);
        catalog.check(&registry)?;

        let governor = Arc::new(ExecutionGovernor::new(
            GovernorConfig {
                max_concurrency: scanner.max_concurrency,
                default_timeout: Duration::from_secs(scanner.task_timeout_secs),
            },
            universe.clone(),
            stats.clone(),
            gateway.clone(),
            notifier.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            registry.clone(),
            catalog,
            WindowGate::new(calendar, scanner.allow_outside_windows),
            governor.clone(),
            stats.clone(),
            clock.clone(),
            Duration::from_secs(scanner.tick_interval_secs),
        ));

        let disabled = config.disabled_task_names();
        if !disabled.is_empty() {
            tracing::info!(tasks = ?disabled, "Tasks disabled at start-up");
        }
        if registry.test_mode_active() {
            tracing::warn!("Test mode active: only test-mode tasks will run");
        }

        Ok(ScannerService {
            state: Arc::new(ScannerState {
                config,
                config_path,
                clock,
                registry,
                scheduler,
                governor,
                stats,
                universe,
                breaker,
                gateway,
                notifier,
            }),
        })
    }
}

/// Main scanner service
pub struct ScannerService {
    state: Arc<ScannerState>,
}

impl ScannerService {
    pub fn builder(config: Config) -> ScannerServiceBuilder {
        ScannerServiceBuilder {
            config,
            config_path: None,
            provider: None,
            clock: None,
            notifier: None,
            stats_path: None,
            catalog: TaskCatalog::new(),
        }
    }

    /// Service with the configured provider and only the built-in tasks.
    pub fn new(config: Config) -> Result<Self, ScanError> {
        Self::builder(config).build()
    }

    pub fn state(&self) -> Arc<ScannerState> {
        self.state.clone()
    }

    /// Run the scheduler and the status server until `shutdown` fires.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let scheduler = self.state.scheduler.clone();
        let loop_shutdown = shutdown.clone();
        let scheduler_handle = tokio::spawn(async move { scheduler.run(loop_shutdown).await });

        let status = &self.state.config.status;
        if status.enabled {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            let app = routes::build_router(self.state.clone())
                .layer(TimeoutLayer::new(Duration::from_secs(10)))
                .layer(cors);

            let addr: SocketAddr = format!("{}:{}", status.host, status.port).parse()?;
            tracing::info!(address = %addr, "Starting status server");

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .await?;
        } else {
            shutdown.cancelled().await;
        }

        if let Err(e) = scheduler_handle.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }
        if !self.state.governor.drain(SHUTDOWN_GRACE).await {
            tracing::warn!(
                live = self.state.governor.live(),
                "Runs still live after shutdown grace period"
            );
        }
        if let Err(e) = self.state.stats.persist().await {
            tracing::warn!(error = %e, "Failed to persist run stats on shutdown");
        }
        Ok(())
    }
}
