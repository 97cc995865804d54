//! Run stats store.
//!
//! One [`RunRecord`] per (task, trading day). Writers go through a single
//! `RwLock` write section; readers get cloned snapshots. The whole table is
//! persisted as JSON after each run and reloaded at start-up.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use zero_common::util::median_secs;

use crate::calendar::{SharedClock, TradingCalendar};
use crate::error::ErrorClass;

/// Maximum number of entries in the cross-task error log.
pub const RECENT_ERRORS_CAP: usize = 50;

const STATS_FILE_VERSION: u32 = 1;

// ============================================================================
// Records
// ============================================================================

/// Most recent failure of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub class: ErrorClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Counters and runtimes of one task on one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub task: String,
    pub trading_day: NaiveDate,
    pub scanned: u64,
    pub matched: u64,
    pub alerted: u64,
    pub runs: u64,
    pub errors: u64,
    pub last_runtime_ms: Option<u64>,
    /// Bounded, oldest first
    pub recent_runtimes_ms: VecDeque<u64>,
    pub last_error: Option<LastError>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    fn new(task: &str, trading_day: NaiveDate) -> Self {
        Self {
            task: task.to_string(),
            trading_day,
            scanned: 0,
            matched: 0,
            alerted: 0,
            runs: 0,
            errors: 0,
            last_runtime_ms: None,
            recent_runtimes_ms: VecDeque::new(),
            last_error: None,
            last_started_at: None,
            last_finished_at: None,
        }
    }

    pub fn last_runtime(&self) -> Option<Duration> {
        self.last_runtime_ms.map(Duration::from_millis)
    }

    /// Median over the rolling runtime window.
    pub fn median_runtime(&self) -> Option<Duration> {
        let secs: Vec<f64> = self
            .recent_runtimes_ms
            .iter()
            .map(|ms| *ms as f64 / 1000.0)
            .collect();
        median_secs(&secs).map(Duration::from_secs_f64)
    }
}

/// Per-day counters across all tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounters {
    pub runs: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub universe_failures: u64,
}

/// One line of the cross-task error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub task: String,
    pub trading_day: NaiveDate,
    pub class: ErrorClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Outcome of one finished run, as handed to [`RunStatsStore::record_run`].
#[derive(Debug, Clone)]
pub struct RunUpdate {
    pub scanned: u64,
    pub matched: u64,
    pub alerted: u64,
    pub runtime: Duration,
    pub error: Option<(ErrorClass, String)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunUpdate {
    pub fn success(
        scanned: u64,
        matched: u64,
        alerted: u64,
        runtime: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            scanned,
            matched,
            alerted,
            runtime,
            error: None,
            started_at,
            finished_at: started_at
                + chrono::Duration::from_std(runtime).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }

    pub fn failure(
        class: ErrorClass,
        message: impl Into<String>,
        runtime: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            error: Some((class, message.into())),
            ..Self::success(0, 0, 0, runtime, started_at)
        }
    }
}

/// Totals across tasks for the current trading day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TodayTotals {
    pub trading_day: Option<NaiveDate>,
    pub tasks_run: usize,
    pub runs: u64,
    pub scanned: u64,
    pub matched: u64,
    pub alerted: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub universe_failures: u64,
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub path: Option<PathBuf>,
    pub history_len: usize,
    pub retain_days: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            path: None,
            history_len: 20,
            retain_days: 7,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StatsTable {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    records: BTreeMap<NaiveDate, BTreeMap<String, RunRecord>>,
    #[serde(default)]
    days: BTreeMap<NaiveDate, DayCounters>,
    #[serde(default)]
    recent_errors: VecDeque<ErrorEntry>,
}

impl StatsTable {
    fn push_error(&mut self, entry: ErrorEntry) {
        self.recent_errors.push_back(entry);
        while self.recent_errors.len() > RECENT_ERRORS_CAP {
            self.recent_errors.pop_front();
        }
    }

    fn prune(&mut self, today: NaiveDate, retain_days: u32) -> usize {
        let cutoff = today - chrono::Duration::days(i64::from(retain_days));
        let before = self.records.len();
        self.records.retain(|day, _| *day > cutoff);
        self.days.retain(|day, _| *day > cutoff);
        self.recent_errors.retain(|e| e.trading_day > cutoff);
        before - self.records.len()
    }
}

/// Per-task, per-trading-day run counters.
pub struct RunStatsStore {
    config: StatsConfig,
    calendar: TradingCalendar,
    clock: SharedClock,
    table: RwLock<StatsTable>,
    persist_lock: AsyncMutex<()>,
}

impl RunStatsStore {
    /// Empty, in-memory store (persists only when `config.path` is set).
    pub fn new(config: StatsConfig, calendar: TradingCalendar, clock: SharedClock) -> Self {
        Self {
            config,
            calendar,
            clock,
            table: RwLock::new(StatsTable {
                version: STATS_FILE_VERSION,
                ..StatsTable::default()
            }),
            persist_lock: AsyncMutex::new(()),
        }
    }

    /// Store seeded from `config.path`. A missing file starts empty; an
    /// unreadable or corrupt one is logged and ignored.
    pub fn load(config: StatsConfig, calendar: TradingCalendar, clock: SharedClock) -> Self {
        let store = Self::new(config, calendar, clock);
        let Some(path) = store.config.path.clone() else {
            return store;
        };
        match read_table(&path) {
            Ok(Some(table)) => {
                let records: usize = table.records.values().map(BTreeMap::len).sum();
                tracing::info!(path = %path.display(), records, "Loaded run stats");
                *store.write() = table;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable run stats file");
            }
        }
        store
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn current_trading_day(&self) -> NaiveDate {
        self.calendar.trading_day(self.clock.now())
    }

    fn read(&self) -> RwLockReadGuard<'_, StatsTable> {
        self.table.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatsTable> {
        self.table.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Fold one run into the task's record for `trading_day`.
    pub fn record_run(&self, task: &str, trading_day: NaiveDate, update: RunUpdate) {
        let history_len = self.config.history_len.max(1);
        let runtime_ms = u64::try_from(update.runtime.as_millis()).unwrap_or(u64::MAX);
        let mut table = self.write();

        let record = table
            .records
            .entry(trading_day)
            .or_default()
            .entry(task.to_string())
            .or_insert_with(|| RunRecord::new(task, trading_day));

        record.runs += 1;
        record.scanned += update.scanned;
        record.matched += update.matched;
        record.alerted += update.alerted;
        record.last_runtime_ms = Some(runtime_ms);
        record.recent_runtimes_ms.push_back(runtime_ms);
        while record.recent_runtimes_ms.len() > history_len {
            record.recent_runtimes_ms.pop_front();
        }
        record.last_started_at = Some(update.started_at);
        record.last_finished_at = Some(update.finished_at);

        let failed = update.error.clone();
        if let Some((class, message)) = &failed {
            record.errors += 1;
            record.last_error = Some(LastError {
                class: *class,
                message: message.clone(),
                at: update.finished_at,
            });
        }

        let day = table.days.entry(trading_day).or_default();
        day.runs += 1;
        if let Some((class, message)) = failed {
            day.errors += 1;
            if class == ErrorClass::TaskTimeout {
                day.timeouts += 1;
            }
            table.push_error(ErrorEntry {
                task: task.to_string(),
                trading_day,
                class,
                message,
                at: update.finished_at,
            });
        }
    }

    /// Note a degraded universe observed by `task`. Does not count as a run.
    pub fn record_universe_failure(
        &self,
        task: &str,
        trading_day: NaiveDate,
        message: &str,
        at: DateTime<Utc>,
    ) {
        let mut table = self.write();
        let record = table
            .records
            .entry(trading_day)
            .or_default()
            .entry(task.to_string())
            .or_insert_with(|| RunRecord::new(task, trading_day));
        record.last_error = Some(LastError {
            class: ErrorClass::UniverseResolutionFailure,
            message: message.to_string(),
            at,
        });

        table.days.entry(trading_day).or_default().universe_failures += 1;
        table.push_error(ErrorEntry {
            task: task.to_string(),
            trading_day,
            class: ErrorClass::UniverseResolutionFailure,
            message: message.to_string(),
            at,
        });
    }

    /// Today's record for a task, if it has run today.
    pub fn get_today(&self, task: &str) -> Option<RunRecord> {
        self.get_record(task, self.current_trading_day())
    }

    pub fn get_record(&self, task: &str, trading_day: NaiveDate) -> Option<RunRecord> {
        self.read()
            .records
            .get(&trading_day)
            .and_then(|tasks| tasks.get(task))
            .cloned()
    }

    /// All of today's records, ordered by task name.
    pub fn today_records(&self) -> Vec<RunRecord> {
        let today = self.current_trading_day();
        self.read()
            .records
            .get(&today)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn aggregate_today(&self) -> TodayTotals {
        let today = self.current_trading_day();
        let table = self.read();
        let mut totals = TodayTotals {
            trading_day: Some(today),
            ..TodayTotals::default()
        };
        if let Some(tasks) = table.records.get(&today) {
            for record in tasks.values().filter(|r| r.runs > 0) {
                totals.tasks_run += 1;
                totals.scanned += record.scanned;
                totals.matched += record.matched;
                totals.alerted += record.alerted;
            }
        }
        if let Some(day) = table.days.get(&today) {
            totals.runs = day.runs;
            totals.errors = day.errors;
            totals.timeouts = day.timeouts;
            totals.universe_failures = day.universe_failures;
        }
        totals
    }

    /// Latest start of `task` on any retained day.
    pub fn last_run_at(&self, task: &str) -> Option<DateTime<Utc>> {
        self.read()
            .records
            .values()
            .filter_map(|tasks| tasks.get(task))
            .filter_map(|r| r.last_started_at)
            .max()
    }

    /// Newest first.
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorEntry> {
        self.read()
            .recent_errors
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn trading_days(&self) -> Vec<NaiveDate> {
        self.read().records.keys().copied().collect()
    }

    /// Prune old days and write the table to disk. No-op without a path.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = self.config.path.clone() else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let json = {
            let today = self.current_trading_day();
            let mut table = self.write();
            let pruned = table.prune(today, self.config.retain_days);
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned old run stats days");
            }
            table.version = STATS_FILE_VERSION;
            serde_json::to_vec_pretty(&*table)?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn read_table(path: &Path) -> anyhow::Result<Option<StatsTable>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let table: StatsTable = serde_json::from_str(&raw)?;
    Ok(Some(table))
}
