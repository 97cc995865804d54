//! Execution governor.
//!
//! The hard isolation boundary between the scheduler and task bodies. Each
//! launch takes one permit from a fixed pool and one per-task execution slot.
//! Both are held by a [`SlotGuard`] owned by the supervising future, so they
//! are released on every exit path: completion, error, panic or deadline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::calendar::{saturating_add, SharedClock};
use crate::data::ProviderGateway;
use crate::error::{ErrorClass, ScanError};
use crate::notification::SharedNotifier;
use crate::stats::{RunStatsStore, RunUpdate};
use crate::task::{TaskBody, TaskContext, TaskDescriptor, TaskOutcome};
use crate::universe::UniverseCache;

// ============================================================================
// Types
// ============================================================================

/// Deadline used when a timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub max_concurrency: usize,
    pub default_timeout: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            default_timeout: Duration::from_secs(180),
        }
    }
}

/// A live execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSlot {
    pub task: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(skip)]
    pub cancel: CancellationToken,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed(TaskOutcome),
    TimedOut,
    Failed { class: ErrorClass, message: String },
}

/// Returned by the supervising future once the run is finalized.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task: String,
    pub run_id: String,
    pub status: RunStatus,
    pub runtime: Duration,
}

/// Result of asking the governor to start a task.
#[derive(Debug)]
pub enum LaunchDecision {
    Launched(JoinHandle<RunReport>),
    /// The task already has a live slot.
    SkippedOverlap,
    /// Every permit is taken.
    SkippedNoPermit,
}

impl LaunchDecision {
    pub fn is_launched(&self) -> bool {
        matches!(self, Self::Launched(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GovernorStats {
    pub max_concurrency: usize,
    pub live: usize,
    pub peak_live: usize,
    pub launched: u64,
    pub timed_out: u64,
    pub failed: u64,
}

type SlotTable = Arc<Mutex<HashMap<String, ExecutionSlot>>>;

fn lock_slots(
    slots: &Mutex<HashMap<String, ExecutionSlot>>,
) -> MutexGuard<'_, HashMap<String, ExecutionSlot>> {
    slots.lock().unwrap_or_else(|p| p.into_inner())
}

/// Owns a permit and a slot; dropping it releases both.
struct SlotGuard {
    key: String,
    slots: SlotTable,
    idle: Arc<Notify>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        slots.remove(&self.key);
        if slots.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

// ============================================================================
// Governor
// ============================================================================

pub struct ExecutionGovernor {
    config: GovernorConfig,
    permits: Arc<Semaphore>,
    slots: SlotTable,
    idle: Arc<Notify>,
    universe: Arc<UniverseCache>,
    stats: Arc<RunStatsStore>,
    gateway: ProviderGateway,
    notifier: SharedNotifier,
    clock: SharedClock,
    peak_live: AtomicUsize,
    launched: AtomicU64,
    timed_out: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl ExecutionGovernor {
    pub fn new(
        config: GovernorConfig,
        universe: Arc<UniverseCache>,
        stats: Arc<RunStatsStore>,
        gateway: ProviderGateway,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> Self {
        let max = config.max_concurrency.max(1);
        Self {
            config: GovernorConfig {
                max_concurrency: max,
                ..config
            },
            permits: Arc::new(Semaphore::new(max)),
            slots: Arc::new(Mutex::new(HashMap::new())),
            idle: Arc::new(Notify::new()),
            universe,
            stats,
            gateway,
            notifier,
            clock,
            peak_live: AtomicUsize::new(0),
            launched: AtomicU64::new(0),
            timed_out: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Number of live execution slots.
    pub fn live(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    pub fn is_running(&self, task: &str) -> bool {
        lock_slots(&self.slots).contains_key(&task.to_lowercase())
    }

    pub fn live_slots(&self) -> Vec<ExecutionSlot> {
        let mut slots: Vec<ExecutionSlot> = lock_slots(&self.slots).values().cloned().collect();
        slots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        slots
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            max_concurrency: self.config.max_concurrency,
            live: self.live(),
            peak_live: self.peak_live.load(Ordering::Relaxed),
            launched: self.launched.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Cancel the tokens of every live run. Slots clear as their deadlines
    /// or completions finalize them.
    pub fn cancel_all(&self) {
        for slot in lock_slots(&self.slots).values() {
            slot.cancel.cancel();
        }
    }

    /// Wait until no slot is live, for at most `grace`. Returns whether the
    /// governor went idle in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.idle.notified();
                if self.live() == 0 {
                    return;
                }
                idle.await;
            }
        };
        tokio::time::timeout(grace, wait).await.is_ok()
    }

    /// Try to start `task` now. Never waits for a permit.
    pub fn run(
        &self,
        task: &TaskDescriptor,
        body: Arc<dyn TaskBody>,
        now: DateTime<Utc>,
    ) -> LaunchDecision {
        let key = task.name.to_lowercase();
        let timeout = task.timeout_or(self.config.default_timeout);
        let run_id = zero_common::logging::generate_run_id();
        let cancel = CancellationToken::new();

        let guard = {
            let mut slots = lock_slots(&self.slots);
            if slots.contains_key(&key) {
                return LaunchDecision::SkippedOverlap;
            }
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                return LaunchDecision::SkippedNoPermit;
            };
            slots.insert(
                key.clone(),
                ExecutionSlot {
                    task: task.name.clone(),
                    run_id: run_id.clone(),
                    started_at: now,
                    deadline: saturating_add(now, timeout),
                    cancel: cancel.clone(),
                },
            );
            self.peak_live.fetch_max(slots.len(), Ordering::Relaxed);
            SlotGuard {
                key,
                slots: self.slots.clone(),
                idle: self.idle.clone(),
                _permit: permit,
            }
        };
        self.launched.fetch_add(1, Ordering::Relaxed);

        let span = tracing::info_span!("task_run", task = %task.name, run_id = %run_id);
        let supervisor = Supervisor {
            task: task.name.clone(),
            run_id,
            timeout,
            started_at: now,
            universe_cap: task.universe_cap,
            volume_coverage: task.volume_coverage,
            cancel,
            body,
            universe: self.universe.clone(),
            stats: self.stats.clone(),
            gateway: self.gateway.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
            timed_out: self.timed_out.clone(),
            failed: self.failed.clone(),
        };

        LaunchDecision::Launched(tokio::spawn(supervisor.supervise(guard).instrument(span)))
    }
}

// ============================================================================
// Supervisor
// ============================================================================

struct Supervisor {
    task: String,
    run_id: String,
    timeout: Duration,
    started_at: DateTime<Utc>,
    universe_cap: Option<usize>,
    volume_coverage: Option<f64>,
    cancel: CancellationToken,
    body: Arc<dyn TaskBody>,
    universe: Arc<UniverseCache>,
    stats: Arc<RunStatsStore>,
    gateway: ProviderGateway,
    notifier: SharedNotifier,
    clock: SharedClock,
    timed_out: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl Supervisor {
    async fn supervise(self, guard: SlotGuard) -> RunReport {
        let started = tokio::time::Instant::now();
        let deadline = started
            .checked_add(self.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        tracing::info!(timeout_secs = self.timeout.as_secs(), "Task started");

        let ctx = TaskContext {
            task: self.task.clone(),
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            deadline,
            cancel: self.cancel.clone(),
            gateway: self.gateway.clone(),
            notifier: self.notifier.clone(),
        };

        let body = self.body.clone();
        let universe = self.universe.clone();
        let stats = self.stats.clone();
        let clock = self.clock.clone();
        let task = self.task.clone();
        let started_at = self.started_at;
        let (cap, coverage) = (self.universe_cap, self.volume_coverage);

        let mut handle = tokio::spawn(
            async move {
                let snapshot = universe.get_universe(started_at).await;
                if snapshot.is_empty() {
                    let now = clock.now();
                    let day = stats.calendar().trading_day(now);
                    stats.record_universe_failure(
                        &task,
                        day,
                        "no universe available from any tier",
                        now,
                    );
                }
                body.run(snapshot.narrowed(cap, coverage), ctx).await
            }
            .in_current_span(),
        );

        let status = match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(Ok(outcome))) => RunStatus::Completed(outcome),
            Ok(Ok(Err(e))) => RunStatus::Failed {
                class: e.class(),
                message: format!("{e:#}"),
            },
            Ok(Err(join_error)) => RunStatus::Failed {
                class: ErrorClass::TaskBodyError,
                message: join_message(join_error),
            },
            Err(_) => {
                self.cancel.cancel();
                handle.abort();
                RunStatus::TimedOut
            }
        };
        let runtime = match status {
            RunStatus::TimedOut => self.timeout,
            _ => started.elapsed(),
        };

        self.finalize(&status, runtime);
        drop(guard);

        if let Err(e) = self.stats.persist().await {
            tracing::warn!(error = %e, "Failed to persist run stats");
        }

        RunReport {
            task: self.task,
            run_id: self.run_id,
            status,
            runtime,
        }
    }

    fn finalize(&self, status: &RunStatus, runtime: Duration) {
        let finished_at = self.clock.now();
        let day = self.stats.calendar().trading_day(finished_at);
        let runtime_ms = u64::try_from(runtime.as_millis()).unwrap_or(u64::MAX);

        let mut update = match status {
            RunStatus::Completed(o) => {
                tracing::info!(
                    runtime_ms,
                    scanned = o.scanned,
                    matched = o.matched,
                    alerted = o.alerted,
                    "Task finished"
                );
                RunUpdate::success(o.scanned, o.matched, o.alerted, runtime, self.started_at)
            }
            RunStatus::TimedOut => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                let e = ScanError::TaskTimeout {
                    task: self.task.clone(),
                    timeout: self.timeout,
                };
                tracing::warn!(runtime_ms, "Task timed out; result will be discarded");
                RunUpdate::failure(e.class(), e.to_string(), runtime, self.started_at)
            }
            RunStatus::Failed { class, message } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(runtime_ms, class = %class, error = %message, "Task failed");
                RunUpdate::failure(*class, message.clone(), runtime, self.started_at)
            }
        };
        update.finished_at = finished_at;
        self.stats.record_run(&self.task, day, update);
    }
}

fn join_message(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("task body aborted: {e}");
    }
    let payload = e.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("task body panicked: {detail}")
}
