//! Scheduler loop.
//!
//! Ticks on a fixed base interval. On each tick every registered task is
//! checked in registry order: enabled and test-mode filter, own cadence,
//! window gate, then handed to the governor. A task that is skipped for lack
//! of a permit or because it is still running stays due and is looked at
//! again on the next tick. There is no retry queue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::calendar::{saturating_add, SharedClock};
use crate::governor::{ExecutionGovernor, LaunchDecision, RunReport};
use crate::stats::RunStatsStore;
use crate::task::{TaskCatalog, TaskRegistry, WindowGate};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not started, or stopped
    Stopped,
    /// Ticking and launching
    Running,
    /// Ticking but launching nothing
    Paused,
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub at: Option<DateTime<Utc>>,
    pub launched: Vec<String>,
    pub skipped_overlap: Vec<String>,
    pub skipped_no_permit: Vec<String>,
    /// Outside its window, slot already fired, or not a trading day
    pub ineligible: Vec<String>,
    pub not_due: usize,
    pub disabled: usize,
    pub handles: Vec<JoinHandle<RunReport>>,
}

impl TickReport {
    pub fn skipped(&self) -> usize {
        self.skipped_overlap.len() + self.skipped_no_permit.len()
    }

    /// Wait for every run launched by this tick.
    pub async fn join(self) -> Vec<RunReport> {
        futures::future::join_all(self.handles)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }
}

/// Per-task view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub entrypoint: String,
    pub interval_secs: u64,
    pub schedule: &'static str,
    pub enabled: bool,
    pub test_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub universe_cap: Option<usize>,
    pub running: bool,
    pub next_due: Option<DateTime<Utc>>,
}

pub struct TaskScheduler {
    registry: Arc<TaskRegistry>,
    catalog: TaskCatalog,
    gate: WindowGate,
    governor: Arc<ExecutionGovernor>,
    stats: Arc<RunStatsStore>,
    clock: SharedClock,
    tick_interval: Duration,
    state: RwLock<SchedulerState>,
    next_due: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        catalog: TaskCatalog,
        gate: WindowGate,
        governor: Arc<ExecutionGovernor>,
        stats: Arc<RunStatsStore>,
        clock: SharedClock,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            catalog,
            gate,
            governor,
            stats,
            clock,
            tick_interval,
            state: RwLock::new(SchedulerState::Stopped),
            next_due: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn governor(&self) -> &Arc<ExecutionGovernor> {
        &self.governor
    }

    pub async fn get_state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn stop(&self) {
        *self.state.write().await = SchedulerState::Stopped;
        info!("Scheduler stopped");
    }

    pub async fn pause(&self) {
        *self.state.write().await = SchedulerState::Paused;
        info!("Scheduler paused");
    }

    pub async fn resume(&self) {
        *self.state.write().await = SchedulerState::Running;
        info!("Scheduler resumed");
    }

    /// Tick until `shutdown` fires or [`stop`](Self::stop) is called.
    pub async fn run(&self, shutdown: CancellationToken) {
        *self.state.write().await = SchedulerState::Running;
        info!(
            tick_secs = self.tick_interval.as_secs(),
            tasks = self.registry.len(),
            max_concurrency = self.governor.config().max_concurrency,
            "Scheduler started"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.get_state().await {
                SchedulerState::Stopped => break,
                SchedulerState::Paused => continue,
                SchedulerState::Running => {
                    // Handles are dropped; runs finish on their own.
                    let _ = self.tick(self.clock.now());
                }
            }
        }

        *self.state.write().await = SchedulerState::Stopped;
        let live = self.governor.live();
        if live > 0 {
            info!(live, "Cancelling in-flight tasks");
            self.governor.cancel_all();
        }
        info!("Scheduler loop exited");
    }

    /// Evaluate every task once at `now` and launch the eligible ones.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            at: Some(now),
            ..TickReport::default()
        };

        for task in self.registry.tasks() {
            if !self.registry.should_run(task) {
                report.disabled += 1;
                continue;
            }

            let key = task.name.to_lowercase();
            let due = self
                .lock_next_due()
                .get(&key)
                .map_or(true, |next| now >= *next);
            if !due {
                report.not_due += 1;
                continue;
            }

            if !self
                .gate
                .eligible(task, now, self.stats.last_run_at(&task.name))
            {
                report.ineligible.push(task.name.clone());
                continue;
            }

            let Some(body) = self.catalog.get(&task.entrypoint) else {
                error!(task = %task.name, entrypoint = %task.entrypoint, "No body for task entrypoint");
                continue;
            };

            match self.governor.run(task, body, now) {
                LaunchDecision::Launched(handle) => {
                    self.lock_next_due()
                        .insert(key, saturating_add(now, task.interval));
                    report.launched.push(task.name.clone());
                    report.handles.push(handle);
                }
                LaunchDecision::SkippedOverlap => {
                    debug!(task = %task.name, "Skipped: previous run still in flight");
                    report.skipped_overlap.push(task.name.clone());
                }
                LaunchDecision::SkippedNoPermit => {
                    debug!(task = %task.name, "Skipped: no execution permit");
                    report.skipped_no_permit.push(task.name.clone());
                }
            }
        }

        info!(
            launched = report.launched.len(),
            skipped = report.skipped(),
            ineligible = report.ineligible.len(),
            live = self.governor.live(),
            "Tick finished"
        );
        report
    }

    pub fn task_statuses(&self) -> Vec<TaskStatus> {
        let next_due = self.lock_next_due().clone();
        self.registry
            .tasks()
            .iter()
            .map(|t| TaskStatus {
                name: t.name.clone(),
                entrypoint: t.entrypoint.clone(),
                interval_secs: t.interval.as_secs(),
                schedule: t.schedule.label(),
                enabled: self.registry.is_enabled(&t.name),
                test_mode: t.test_mode,
                universe_cap: t.universe_cap,
                running: self.governor.is_running(&t.name),
                next_due: next_due.get(&t.name.to_lowercase()).copied(),
            })
            .collect()
    }

    fn lock_next_due(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.next_due.lock().unwrap_or_else(|p| p.into_inner())
    }
}
