//! Integration tests for trading-day scoping and persistence of run stats.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::America::New_York;

use zero_scanner::calendar::{Clock, ManualClock, TradingCalendar};
use zero_scanner::error::ErrorClass;
use zero_scanner::stats::{RunStatsStore, RunUpdate, StatsConfig};

fn ny(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    New_York
        .with_ymd_and_hms(2024, 3, day, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn config(path: std::path::PathBuf) -> StatsConfig {
    StatsConfig {
        path: Some(path),
        history_len: 20,
        retain_days: 7,
    }
}

#[tokio::test]
async fn test_rollover_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scanner_stats.json");
    // 23:30 New York is already the next day in UTC.
    let clock = Arc::new(ManualClock::new(ny(5, 23, 30)));

    let store = RunStatsStore::new(config(path.clone()), TradingCalendar::new_york(), clock.clone());
    let tuesday = store.current_trading_day();
    assert_eq!(tuesday.to_string(), "2024-03-05");

    store.record_run("rsi", tuesday, RunUpdate::success(800, 12, 3, Duration::from_secs(4), clock.now()));
    store.record_run(
        "rsi",
        tuesday,
        RunUpdate::failure(ErrorClass::ProviderError, "circuit open", Duration::from_secs(1), clock.now()),
    );
    store.persist().await.unwrap();

    // Restart after midnight New York.
    clock.set(ny(6, 0, 5));
    let restarted = RunStatsStore::load(config(path), TradingCalendar::new_york(), clock.clone());

    assert!(restarted.get_today("rsi").is_none());
    let totals = restarted.aggregate_today();
    assert_eq!(totals.runs, 0);
    assert_eq!(totals.scanned, 0);
    assert_eq!(totals.trading_day.unwrap().to_string(), "2024-03-06");

    let old = restarted.get_record("rsi", tuesday).unwrap();
    assert_eq!(old.runs, 2);
    assert_eq!(old.scanned, 800);
    assert_eq!(old.errors, 1);
    assert_eq!(old.last_error.unwrap().class, ErrorClass::ProviderError);
    assert_eq!(restarted.last_run_at("rsi"), Some(ny(5, 23, 30)));

    let wednesday = restarted.current_trading_day();
    restarted.record_run("rsi", wednesday, RunUpdate::success(5, 0, 0, Duration::from_secs(1), clock.now()));
    assert_eq!(restarted.get_today("rsi").unwrap().runs, 1);
    assert_eq!(restarted.get_record("rsi", tuesday).unwrap().runs, 2);
}

#[tokio::test]
async fn test_missing_file_starts_empty_and_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("stats.json");
    let clock = Arc::new(ManualClock::new(ny(5, 10, 0)));

    let store = RunStatsStore::load(config(path.clone()), TradingCalendar::new_york(), clock.clone());
    assert!(store.trading_days().is_empty());

    let day = store.current_trading_day();
    store.record_run("gap", day, RunUpdate::success(1, 1, 1, Duration::ZERO, clock.now()));
    store.persist().await.unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["records"]["2024-03-05"]["gap"]["alerted"], 1);
}
