//! Trading calendar and clock abstraction.
//!
//! All time-dependent components read "now" through a [`Clock`] so tests can
//! drive them with a [`ManualClock`]. Trading-day questions are answered in the
//! fixed calendar zone (New York by default), never in the host's local zone.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use zero_common::config::ScannerConfig;

use crate::error::ScanError;

// ============================================================================
// Clock
// ============================================================================

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Real system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// `at + by`, clamped to the latest representable instant instead of
/// overflowing.
pub fn saturating_add(at: DateTime<Utc>, by: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ============================================================================
// Trading Calendar
// ============================================================================

/// Fixed-zone trading calendar: weekdays minus configured holidays.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    tz: Tz,
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(tz: Tz, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            tz,
            holidays: holidays.into_iter().collect(),
        }
    }

    /// New York calendar without holidays.
    pub fn new_york() -> Self {
        Self::new(chrono_tz::America::New_York, [])
    }

    /// Build from scanner configuration.
    pub fn from_config(config: &ScannerConfig) -> Result<Self, ScanError> {
        let tz = Tz::from_str(&config.timezone).map_err(|_| {
            ScanError::Configuration(format!("unknown time zone: {}", config.timezone))
        })?;
        Ok(Self::new(tz, config.holidays.iter().copied()))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// `now` converted to the calendar zone.
    pub fn local(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        now.with_timezone(&self.tz)
    }

    /// The calendar date in effect at `now`. Stats records are keyed by this.
    pub fn trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date_naive()
    }

    /// Local time of day at `now`.
    pub fn time_of_day(&self, now: DateTime<Utc>) -> NaiveTime {
        self.local(now).time()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Whether the local date at `now` is a trading day.
    pub fn is_trading_day_at(&self, now: DateTime<Utc>) -> bool {
        self.is_trading_day(self.trading_day(now))
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new_york()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_trading_day_uses_calendar_zone() {
        let cal = TradingCalendar::new_york();
        // 2024-03-06 02:00 UTC is still 2024-03-05 evening in New York.
        let day = cal.trading_day(utc(2024, 3, 6, 2, 0));
        assert_eq!(day, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_weekends_and_holidays() {
        let holiday = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let cal = TradingCalendar::new(chrono_tz::America::New_York, [holiday]);
        assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())); // Sat
        assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap())); // Sun
        assert!(cal.is_trading_day(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()));
        assert!(!cal.is_trading_day(holiday));
    }

    #[test]
    fn test_time_of_day_handles_dst() {
        let cal = TradingCalendar::new_york();
        // Winter: UTC-5
        assert_eq!(
            cal.time_of_day(utc(2024, 1, 10, 14, 30)),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        // Summer: UTC-4
        assert_eq!(
            cal.time_of_day(utc(2024, 7, 10, 13, 30)),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_from_config_rejects_unknown_zone() {
        let mut config = ScannerConfig::default();
        config.timezone = "Nowhere/Special".into();
        assert!(matches!(
            TradingCalendar::from_config(&config),
            Err(ScanError::Configuration(_))
        ));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(utc(2024, 3, 5, 14, 0));
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), utc(2024, 3, 5, 14, 1) + chrono::Duration::seconds(30));
        clock.set(utc(2024, 3, 6, 0, 0));
        assert_eq!(clock.now(), utc(2024, 3, 6, 0, 0));
    }

    #[test]
    fn test_saturating_add_clamps() {
        let t = utc(2024, 3, 5, 15, 0);
        assert_eq!(
            saturating_add(t, std::time::Duration::from_secs(60)),
            utc(2024, 3, 5, 15, 1)
        );
        assert_eq!(
            saturating_add(t, std::time::Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
