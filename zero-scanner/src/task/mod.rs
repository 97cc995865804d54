//! Task model: descriptors, the registry built at start-up, the catalog of
//! task bodies, and the context handed to each run.
//!
//! The registry's list of descriptors never changes after start-up. The only
//! runtime mutation is the per-name enabled flag.

mod window;

pub use window::WindowGate;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use zero_common::config::{Config, ScheduleConfig, TaskConfig};

use crate::data::ProviderGateway;
use crate::error::{ScanError, TaskError};
use crate::notification::SharedNotifier;
use crate::universe::UniverseSnapshot;

// ============================================================================
// Schedule
// ============================================================================

/// A `[start, end)` time-of-day window in the trading zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse "HH:MM" bounds.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
        (start < end).then_some(Self { start, end })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// A cron slot, evaluated in the trading zone.
#[derive(Debug, Clone)]
pub struct Slot {
    expr: String,
    schedule: cron::Schedule,
}

impl Slot {
    pub fn parse(expr: &str) -> Result<Self, ScanError> {
        let schedule = cron::Schedule::from_str(expr)
            .map_err(|e| ScanError::Configuration(format!("invalid cron slot {expr:?}: {e}")))?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// The latest firing of this slot on `local_now`'s date that is not after
    /// `local_now`.
    pub fn latest_on_day(&self, local_now: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = local_now.timezone();
        let midnight = local_now.date_naive().and_hms_opt(0, 0, 0)?;
        let day_start = tz.from_local_datetime(&midnight).earliest()?;
        // `after` is exclusive; step back one second so a midnight slot counts.
        let from = day_start - chrono::Duration::seconds(1);

        self.schedule
            .after(&from)
            .take_while(|t| *t <= local_now)
            .last()
    }
}

/// When a task may run.
#[derive(Debug, Clone)]
pub enum ScheduleKind {
    /// Any time, on its interval
    Continuous,
    /// Only inside one of the windows, on trading days
    WindowGated(Vec<TimeWindow>),
    /// Once per slot per trading day
    Slotted(Vec<Slot>),
}

impl ScheduleKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::WindowGated(_) => "window_gated",
            Self::Slotted(_) => "slotted",
        }
    }

    fn from_config(task: &str, config: &ScheduleConfig) -> Result<Self, ScanError> {
        match config {
            ScheduleConfig::Continuous => Ok(Self::Continuous),
            ScheduleConfig::WindowGated { windows } => {
                let parsed = windows
                    .iter()
                    .map(|w| {
                        TimeWindow::parse(&w.start, &w.end).ok_or_else(|| {
                            ScanError::Configuration(format!(
                                "task {task}: invalid window {}-{}",
                                w.start, w.end
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if parsed.is_empty() {
                    return Err(ScanError::Configuration(format!(
                        "task {task}: window_gated schedule without windows"
                    )));
                }
                Ok(Self::WindowGated(parsed))
            }
            ScheduleConfig::Slotted { slots } => {
                let parsed = slots
                    .iter()
                    .map(|s| Slot::parse(s))
                    .collect::<Result<Vec<_>, _>>()?;
                if parsed.is_empty() {
                    return Err(ScanError::Configuration(format!(
                        "task {task}: slotted schedule without slots"
                    )));
                }
                Ok(Self::Slotted(parsed))
            }
        }
    }
}

// ============================================================================
// Task Descriptor
// ============================================================================

/// Immutable description of one registered task.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub name: String,
    pub entrypoint: String,
    pub interval: Duration,
    pub schedule: ScheduleKind,
    /// Initial enabled flag; the live value is kept by the registry
    pub enabled: bool,
    pub test_mode: bool,
    /// Overrides the global task timeout when set
    pub timeout: Option<Duration>,
    /// Per-task cut of the shared universe
    pub universe_cap: Option<usize>,
    pub volume_coverage: Option<f64>,
}

impl TaskDescriptor {
    /// Continuous task whose entrypoint has the same name.
    pub fn continuous(name: impl Into<String>, interval: Duration) -> Self {
        let name = name.into();
        Self {
            entrypoint: name.clone(),
            name,
            interval,
            schedule: ScheduleKind::Continuous,
            enabled: true,
            test_mode: false,
            timeout: None,
            universe_cap: None,
            volume_coverage: None,
        }
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleKind) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Scan at most `cap` symbols, stopping early once `coverage` of total
    /// volume is reached.
    pub fn with_universe(mut self, cap: Option<usize>, coverage: Option<f64>) -> Self {
        self.universe_cap = cap;
        self.volume_coverage = coverage;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn from_config(config: &TaskConfig, test_mode: bool) -> Result<Self, ScanError> {
        Ok(Self {
            name: config.name.clone(),
            entrypoint: config.entrypoint.clone(),
            interval: Duration::from_secs(config.effective_interval_secs()),
            schedule: ScheduleKind::from_config(&config.name, &config.schedule)?,
            enabled: config.enabled,
            test_mode,
            timeout: config.timeout_secs.map(Duration::from_secs),
            universe_cap: config.universe_cap,
            volume_coverage: config.volume_coverage,
        })
    }

    /// The deadline budget for one run.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

// ============================================================================
// Task Registry
// ============================================================================

/// Fixed list of descriptors plus a name-keyed enabled table.
pub struct TaskRegistry {
    tasks: Vec<Arc<TaskDescriptor>>,
    enabled: RwLock<HashMap<String, bool>>,
}

impl TaskRegistry {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Result<Self, ScanError> {
        let mut enabled = HashMap::with_capacity(tasks.len());
        for task in &tasks {
            if enabled.insert(task.name.to_lowercase(), task.enabled).is_some() {
                return Err(ScanError::Configuration(format!(
                    "task {} is registered twice",
                    task.name
                )));
            }
        }
        Ok(Self {
            tasks: tasks.into_iter().map(Arc::new).collect(),
            enabled: RwLock::new(enabled),
        })
    }

    /// Build from configuration, applying `disabled_tasks` and the test-mode list.
    pub fn from_config(config: &Config) -> Result<Self, ScanError> {
        let tasks = config
            .tasks
            .iter()
            .map(|t| TaskDescriptor::from_config(t, config.is_test_mode(t)))
            .collect::<Result<Vec<_>, _>>()?;
        let registry = Self::new(tasks)?;
        registry.apply_disabled(&config.scanner.disabled_tasks);
        Ok(registry)
    }

    pub fn tasks(&self) -> &[Arc<TaskDescriptor>] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<TaskDescriptor>> {
        self.tasks
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled
            .read()
            .map(|table| table.get(&name.to_lowercase()).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Toggle one task. Returns `false` when no task has that name.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let key = name.to_lowercase();
        let Ok(mut table) = self.enabled.write() else {
            return false;
        };
        match table.get_mut(&key) {
            Some(flag) => {
                if *flag != enabled {
                    tracing::info!(task = %name, enabled, "Task enabled flag changed");
                }
                *flag = enabled;
                true
            }
            None => false,
        }
    }

    /// Reset every flag to its descriptor's initial value, then disable the
    /// named tasks (case-insensitive). Unknown names are logged and ignored.
    pub fn apply_disabled(&self, disabled: &[String]) {
        let disabled: Vec<String> = disabled.iter().map(|n| n.to_lowercase()).collect();
        for name in &disabled {
            if self.get(name).is_none() {
                tracing::warn!(task = %name, "Disabled task is not registered");
            }
        }
        if let Ok(mut table) = self.enabled.write() {
            for task in &self.tasks {
                let key = task.name.to_lowercase();
                let on = task.enabled && !disabled.contains(&key);
                table.insert(key, on);
            }
        }
    }

    /// Re-apply enabled flags from a freshly loaded configuration.
    pub fn reload_flags(&self, config: &Config) {
        if let Ok(mut table) = self.enabled.write() {
            for task in &self.tasks {
                let configured = config
                    .tasks
                    .iter()
                    .find(|t| t.name.eq_ignore_ascii_case(&task.name))
                    .map_or(task.enabled, |t| t.enabled);
                table.insert(task.name.to_lowercase(), configured);
            }
        }
        for name in &config.scanner.disabled_tasks {
            self.set_enabled(name, false);
        }
    }

    /// Whether any registered task is in test mode.
    pub fn test_mode_active(&self) -> bool {
        self.tasks.iter().any(|t| t.test_mode)
    }

    /// Enabled, and (when any task is in test mode) itself in test mode.
    pub fn should_run(&self, task: &TaskDescriptor) -> bool {
        self.is_enabled(&task.name) && (!self.test_mode_active() || task.test_mode)
    }
}

// ============================================================================
// Task Body & Context
// ============================================================================

/// Counters reported by one successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub scanned: u64,
    pub matched: u64,
    pub alerted: u64,
}

impl TaskOutcome {
    pub fn new(scanned: u64, matched: u64, alerted: u64) -> Self {
        Self {
            scanned,
            matched,
            alerted,
        }
    }
}

/// Everything a task body may use during one run.
#[derive(Clone)]
pub struct TaskContext {
    pub task: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Governor deadline; the body is abandoned when it passes
    pub deadline: tokio::time::Instant,
    /// Cancelled at the deadline. Long bodies should check it between units of work.
    pub cancel: CancellationToken,
    pub gateway: ProviderGateway,
    pub notifier: SharedNotifier,
}

impl TaskContext {
    /// `Err(TaskError::Cancelled)` once the run has been cancelled.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .saturating_duration_since(tokio::time::Instant::now())
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task)
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// A unit of scanning work.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn run(
        &self,
        universe: UniverseSnapshot,
        ctx: TaskContext,
    ) -> Result<TaskOutcome, TaskError>;
}

/// Adapter turning an async closure into a [`TaskBody`].
pub struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> TaskBody for FnTask<F>
where
    F: Fn(UniverseSnapshot, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutcome, TaskError>> + Send,
{
    async fn run(
        &self,
        universe: UniverseSnapshot,
        ctx: TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        (self.0)(universe, ctx).await
    }
}

/// Wrap an async closure as a shared task body.
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskBody>
where
    F: Fn(UniverseSnapshot, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutcome, TaskError>> + Send + 'static,
{
    Arc::new(FnTask(f))
}

// ============================================================================
// Task Catalog
// ============================================================================

/// Entrypoint name → task body.
#[derive(Default, Clone)]
pub struct TaskCatalog {
    bodies: HashMap<String, Arc<dyn TaskBody>>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entrypoint: impl Into<String>, body: Arc<dyn TaskBody>) {
        self.bodies.insert(entrypoint.into(), body);
    }

    pub fn with(mut self, entrypoint: impl Into<String>, body: Arc<dyn TaskBody>) -> Self {
        self.register(entrypoint, body);
        self
    }

    pub fn get(&self, entrypoint: &str) -> Option<Arc<dyn TaskBody>> {
        self.bodies.get(entrypoint).cloned()
    }

    pub fn entrypoints(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bodies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Every registered task must resolve to a body.
    pub fn check(&self, registry: &TaskRegistry) -> Result<(), ScanError> {
        let missing: Vec<String> = registry
            .tasks()
            .iter()
            .filter(|t| !self.bodies.contains_key(&t.entrypoint))
            .map(|t| format!("{} -> {}", t.name, t.entrypoint))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ScanError::Configuration(format!(
                "unknown task entrypoints: {}",
                missing.join(", ")
            )))
        }
    }
}
