//! Configuration management for the Zero scanner service.
//!
//! The scanner reads a single JSON file, by default `~/.codecoder/scanner.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ZERO_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ZERO_SCANNER_CONFIG` → path of the config file
//! - `ZERO_SCANNER_TICK_SECS` → scanner.tick_interval_secs
//! - `ZERO_SCANNER_TASK_TIMEOUT_SECS` → scanner.task_timeout_secs
//! - `ZERO_SCANNER_MAX_CONCURRENCY` → scanner.max_concurrency
//! - `ZERO_SCANNER_DISABLED_TASKS` → scanner.disabled_tasks (comma separated)
//! - `ZERO_SCANNER_TEST_MODE_TASKS` → scanner.test_mode_tasks (comma separated)
//! - `ZERO_SCANNER_UNIVERSE_HARD_CAP` → scanner.universe.hard_cap
//! - `ZERO_SCANNER_STATIC_UNIVERSE` → scanner.universe.static_symbols (comma separated)
//! - `ZERO_SCANNER_STATS_PATH` → scanner.stats_path
//! - `ZERO_SCANNER_PROVIDER_API_KEY` → provider.api_key
//! - `ZERO_SCANNER_<TASK>_INTERVAL_SECS` → tasks[].interval_secs (task name
//!   upper-cased, other characters mapped to `_`; the 5s floor still applies)
//! - `ZERO_LOG_LEVEL` → observability.log_level

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(
            || PathBuf::from(".codecoder"),
            |dirs| dirs.home_dir().join(".codecoder"),
        )
}

/// Get the configuration file path, honouring `ZERO_SCANNER_CONFIG`.
pub fn config_path() -> PathBuf {
    std::env::var("ZERO_SCANNER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("scanner.json"))
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the scanner service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scheduling, governance, universe and stats settings
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Market data provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Outbound notification settings
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Status HTTP server settings
    #[serde(default)]
    pub status: StatusServerConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Registered tasks
    #[serde(default = "default_tasks")]
    pub tasks: Vec<TaskConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scanner: ScannerConfig::default(),
            provider: ProviderConfig::default(),
            notification: NotificationConfig::default(),
            status: StatusServerConfig::default(),
            observability: ObservabilityConfig::default(),
            tasks: default_tasks(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file is not an error: defaults are returned.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration and apply environment variable overrides.
    pub fn load_with_env() -> anyhow::Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Unlike a missing variable, a variable that is set but does not parse is
    /// a configuration error.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(secs) = env_parse("ZERO_SCANNER_TICK_SECS")? {
            self.scanner.tick_interval_secs = secs;
        }
        if let Some(secs) = env_parse("ZERO_SCANNER_TASK_TIMEOUT_SECS")? {
            self.scanner.task_timeout_secs = secs;
        }
        if let Some(n) = env_parse("ZERO_SCANNER_MAX_CONCURRENCY")? {
            self.scanner.max_concurrency = n;
        }
        if let Some(cap) = env_parse("ZERO_SCANNER_UNIVERSE_HARD_CAP")? {
            self.scanner.universe.hard_cap = cap;
        }
        if let Ok(raw) = std::env::var("ZERO_SCANNER_DISABLED_TASKS") {
            self.scanner.disabled_tasks = parse_name_list(&raw);
        }
        if let Ok(raw) = std::env::var("ZERO_SCANNER_TEST_MODE_TASKS") {
            self.scanner.test_mode_tasks = parse_name_list(&raw);
        }
        if let Ok(raw) = std::env::var("ZERO_SCANNER_STATIC_UNIVERSE") {
            self.scanner.universe.static_symbols = parse_symbol_list(&raw);
        }
        if let Ok(path) = std::env::var("ZERO_SCANNER_STATS_PATH") {
            self.scanner.stats_path = Some(path);
        }
        if let Ok(key) = std::env::var("ZERO_SCANNER_PROVIDER_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(level) = std::env::var("ZERO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        for task in &mut self.tasks {
            if let Some(secs) = env_parse(&task_interval_key(&task.name))? {
                task.interval_secs = secs;
            }
        }
        Ok(())
    }

    /// Names of tasks that should start disabled: those with `enabled: false`
    /// plus everything in `scanner.disabled_tasks`.
    pub fn disabled_task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| !t.enabled)
            .map(|t| t.name.to_lowercase())
            .collect();
        for name in &self.scanner.disabled_tasks {
            let name = name.to_lowercase();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Whether a task runs in test mode, either from its own flag or from
    /// `scanner.test_mode_tasks`.
    pub fn is_test_mode(&self, task: &TaskConfig) -> bool {
        task.test_mode
            || self
                .scanner
                .test_mode_tasks
                .iter()
                .any(|n| n.eq_ignore_ascii_case(&task.name))
    }
}

/// `gap-scan` → `ZERO_SCANNER_GAP_SCAN_INTERVAL_SECS`
pub fn task_interval_key(task: &str) -> String {
    let name: String = task
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("ZERO_SCANNER_{name}_INTERVAL_SECS")
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key}={raw:?} is not a valid value"))),
        Err(_) => Ok(None),
    }
}

/// Parse a comma separated list of task names (lowercased, blanks dropped).
pub fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a comma separated list of symbols (uppercased, blanks dropped).
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// Scanner Configuration
// ============================================================================

/// Scheduling and resource-governance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Base tick interval of the scheduler loop in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Global per-task timeout in seconds (tasks may override)
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Maximum number of task bodies running at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// IANA name of the trading-calendar time zone
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Market holidays (no window-gated or slotted task runs on these dates)
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,

    /// Let window-gated tasks run outside their windows (diagnostics only)
    #[serde(default)]
    pub allow_outside_windows: bool,

    /// Tasks disabled at start-up (case-insensitive names)
    #[serde(default)]
    pub disabled_tasks: Vec<String>,

    /// When non-empty, only these tasks run
    #[serde(default)]
    pub test_mode_tasks: Vec<String>,

    /// Where the stats snapshot is persisted (no persistence when unset)
    #[serde(default)]
    pub stats_path: Option<String>,

    /// Number of runtimes kept per task for median computation
    #[serde(default = "default_runtime_history_len")]
    pub runtime_history_len: usize,

    /// Days of historical run records kept in the stats snapshot
    #[serde(default = "default_stats_retain_days")]
    pub stats_retain_days: u32,

    /// Universe cache settings
    #[serde(default)]
    pub universe: UniverseConfig,

    /// Circuit breaker guarding provider calls
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            task_timeout_secs: default_task_timeout(),
            max_concurrency: default_max_concurrency(),
            timezone: default_timezone(),
            holidays: Vec::new(),
            allow_outside_windows: false,
            disabled_tasks: Vec::new(),
            test_mode_tasks: Vec::new(),
            stats_path: None,
            runtime_history_len: default_runtime_history_len(),
            stats_retain_days: default_stats_retain_days(),
            universe: UniverseConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

/// Universe cache settings.
///
/// `ttl_secs` decides when a rebuild is attempted. `stale_ttl_secs` decides how
/// long the last good snapshot may still be served when a rebuild fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Maximum number of symbols in any snapshot
    #[serde(default = "default_hard_cap")]
    pub hard_cap: usize,

    /// Freshness window of a dynamic snapshot in seconds
    #[serde(default = "default_universe_ttl")]
    pub ttl_secs: u64,

    /// How long a dynamic snapshot may be served as a stale fallback
    #[serde(default = "default_universe_stale_ttl")]
    pub stale_ttl_secs: u64,

    /// A provider result smaller than this is treated as a failure
    #[serde(default = "default_universe_min_size")]
    pub min_size: usize,

    /// Timeout of a single ranked-list fetch in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Configured static fallback list
    #[serde(default)]
    pub static_symbols: Vec<String>,

    /// Last-resort hardcoded list
    #[serde(default = "default_emergency_symbols")]
    pub emergency_symbols: Vec<String>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            hard_cap: default_hard_cap(),
            ttl_secs: default_universe_ttl(),
            stale_ttl_secs: default_universe_stale_ttl(),
            min_size: default_universe_min_size(),
            fetch_timeout_secs: default_fetch_timeout(),
            static_symbols: Vec::new(),
            emergency_symbols: default_emergency_symbols(),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open before allowing a probe
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
        }
    }
}

// ============================================================================
// Task Configuration
// ============================================================================

/// One registered task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task name
    pub name: String,

    /// Name of the task body in the service's catalog
    pub entrypoint: String,

    /// Base interval between runs in seconds (floored at 5)
    #[serde(default = "default_task_interval")]
    pub interval_secs: u64,

    /// When the task may run
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Whether the task starts enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Run the task in test mode
    #[serde(default)]
    pub test_mode: bool,

    /// Per-task timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Most symbols this task scans, taken from the top of the shared universe
    #[serde(default)]
    pub universe_cap: Option<usize>,

    /// Stop once the scanned symbols cover this share (0-1] of total
    /// traded volume
    #[serde(default)]
    pub volume_coverage: Option<f64>,
}

/// Schedule kind of a task.
///
/// ```json
/// { "kind": "window_gated", "windows": [{ "start": "09:30", "end": "16:00" }] }
/// { "kind": "slotted", "slots": ["0 0 9 * * Mon-Fri", "0 15 16 * * Mon-Fri"] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Runs on its interval at any time
    #[default]
    Continuous,
    /// Runs only inside one of the windows on a trading day
    WindowGated { windows: Vec<WindowConfig> },
    /// Fires once per cron slot per trading day
    Slotted { slots: Vec<String> },
}

/// A time-of-day window in the trading time zone, `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// "HH:MM"
    pub start: String,
    /// "HH:MM"
    pub end: String,
}

impl WindowConfig {
    /// Parse both bounds. `None` if either is not a valid "HH:MM".
    pub fn parse(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(self.start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(self.end.trim(), "%H:%M").ok()?;
        Some((start, end))
    }
}

/// Minimum accepted task interval.
pub const MIN_TASK_INTERVAL_SECS: u64 = 5;

impl TaskConfig {
    /// Interval with the floor applied.
    pub fn effective_interval_secs(&self) -> u64 {
        self.interval_secs.max(MIN_TASK_INTERVAL_SECS)
    }
}

// ============================================================================
// Provider / Notification / Status / Observability
// ============================================================================

/// Market data provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the snapshot API
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// API key (prefer `ZERO_SCANNER_PROVIDER_API_KEY`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Client-side rate limit
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: None,
            requests_per_minute: default_requests_per_minute(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Outbound notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook receiving `{"text": ...}` posts; log-only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Attempts per message before giving up
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            retry_count: default_retry_count(),
        }
    }
}

/// Status HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_status_port")]
    pub port: u16,
}

impl Default for StatusServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_status_port(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_tasks() -> Vec<TaskConfig> {
    vec![TaskConfig {
        name: "status_report".to_string(),
        entrypoint: "heartbeat".to_string(),
        interval_secs: 300,
        schedule: ScheduleConfig::Continuous,
        enabled: true,
        test_mode: false,
        timeout_secs: None,
        universe_cap: None,
        volume_coverage: None,
    }]
}

fn default_tick_interval() -> u64 {
    20
}
fn default_task_timeout() -> u64 {
    180
}
fn default_max_concurrency() -> usize {
    4
}
fn default_timezone() -> String {
    "America/New_York".to_string()
}
fn default_runtime_history_len() -> usize {
    20
}
fn default_stats_retain_days() -> u32 {
    7
}
fn default_hard_cap() -> usize {
    800
}
fn default_universe_ttl() -> u64 {
    180
}
fn default_universe_stale_ttl() -> u64 {
    900
}
fn default_universe_min_size() -> usize {
    1
}
fn default_fetch_timeout() -> u64 {
    15
}
fn default_emergency_symbols() -> Vec<String> {
    ["SPY", "QQQ", "IWM", "AAPL", "MSFT", "NVDA"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown() -> u64 {
    30
}
fn default_task_interval() -> u64 {
    60
}
fn default_provider_url() -> String {
    "https://api.polygon.io".to_string()
}
fn default_requests_per_minute() -> u32 {
    300
}
fn default_request_timeout() -> u64 {
    10
}
fn default_retry_count() -> u32 {
    3
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_status_port() -> u16 {
    4436
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_true() -> bool {
    true
}
