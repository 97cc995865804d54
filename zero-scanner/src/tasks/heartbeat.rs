//! Built-in `heartbeat` task: publishes a summary of today's run stats.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

use zero_common::util::truncate_with_ellipsis;

use crate::circuit_breaker::CircuitState;
use crate::error::TaskError;
use crate::stats::{RunRecord, RunStatsStore, TodayTotals};
use crate::task::{TaskBody, TaskContext, TaskOutcome};
use crate::universe::UniverseSnapshot;

pub const HEARTBEAT_ENTRYPOINT: &str = "heartbeat";

const MAX_ERRORS_LISTED: usize = 5;

pub struct HeartbeatTask {
    stats: Arc<RunStatsStore>,
}

impl HeartbeatTask {
    pub fn new(stats: Arc<RunStatsStore>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl TaskBody for HeartbeatTask {
    async fn run(
        &self,
        universe: UniverseSnapshot,
        ctx: TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let records = self.stats.today_records();
        let totals = self.stats.aggregate_today();
        let errors = self.stats.recent_errors(MAX_ERRORS_LISTED);
        let breaker = ctx.gateway.breaker().state();

        let mut text = render(&totals, &records, breaker, &universe);
        if !errors.is_empty() {
            text.push_str("\nRecent errors:\n");
            for e in &errors {
                let _ = writeln!(
                    text,
                    "  {} {} [{}] {}",
                    e.at.format("%H:%M:%S"),
                    e.task,
                    e.class,
                    truncate_with_ellipsis(&e.message, 120)
                );
            }
        }

        ctx.checkpoint()?;
        if let Err(e) = ctx.notifier.publish(&text).await {
            tracing::warn!(error = %e, "Heartbeat publish failed");
        }

        Ok(TaskOutcome::new(records.len() as u64, 0, 0))
    }
}

fn breaker_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "OPEN",
        CircuitState::HalfOpen => "half-open",
    }
}

fn render(
    totals: &TodayTotals,
    records: &[RunRecord],
    breaker: CircuitState,
    universe: &UniverseSnapshot,
) -> String {
    let mut out = String::new();
    let day = totals
        .trading_day
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(
        out,
        "Scanner heartbeat {day}: {} runs, {} errors ({} timeouts), universe {} ({}), breaker {}",
        totals.runs,
        totals.errors,
        totals.timeouts,
        universe.len(),
        universe.source(),
        breaker_label(breaker),
    );

    if records.is_empty() {
        out.push_str("No runs yet today.\n");
        return out;
    }

    for r in records {
        let median = r
            .median_runtime()
            .map_or_else(|| "-".to_string(), |d| format!("{:.1}s", d.as_secs_f64()));
        let _ = write!(
            out,
            "  {}: runs={} scanned={} matched={} alerted={} median={}",
            r.task, r.runs, r.scanned, r.matched, r.alerted, median
        );
        if let Some(e) = &r.last_error {
            let _ = write!(out, " last_error={}", e.class);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ManualClock;
    use crate::calendar::TradingCalendar;
    use crate::error::ErrorClass;
    use crate::stats::{RunUpdate, StatsConfig};
    use crate::universe::UniverseSource;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn test_render_lists_tasks() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap();
        let stats = RunStatsStore::new(
            StatsConfig::default(),
            TradingCalendar::new_york(),
            Arc::new(ManualClock::new(now)),
        );
        let day = stats.current_trading_day();
        stats.record_run("rsi", day, RunUpdate::success(800, 3, 1, Duration::from_secs(2), now));
        stats.record_run(
            "gap",
            day,
            RunUpdate::failure(ErrorClass::TaskTimeout, "deadline", Duration::from_secs(180), now),
        );

        let universe = UniverseSnapshot::new(vec!["SPY".into()], now, UniverseSource::Emergency);
        let text = render(
            &stats.aggregate_today(),
            &stats.today_records(),
            CircuitState::Open,
            &universe,
        );

        assert!(text.contains("2 runs, 1 errors (1 timeouts)"));
        assert!(text.contains("breaker OPEN"));
        assert!(text.contains("rsi: runs=1 scanned=800 matched=3 alerted=1 median=2.0s"));
        assert!(text.contains("last_error=TaskTimeout"));
        assert!(text.contains("universe 1 (emergency)"));
    }
}
