use chrono::{DateTime, Utc};

use super::{ScheduleKind, TaskDescriptor};
use crate::calendar::TradingCalendar;

/// Decides whether a task's schedule lets it run at a given instant.
///
/// Total and side-effect free. Slot memory is the caller-supplied last start
/// time from the stats store.
#[derive(Debug, Clone)]
pub struct WindowGate {
    calendar: TradingCalendar,
    allow_outside_windows: bool,
}

impl WindowGate {
    pub fn new(calendar: TradingCalendar, allow_outside_windows: bool) -> Self {
        Self {
            calendar,
            allow_outside_windows,
        }
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn eligible(
        &self,
        task: &TaskDescriptor,
        now: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
    ) -> bool {
        match &task.schedule {
            ScheduleKind::Continuous => true,
            ScheduleKind::WindowGated(windows) => {
                if !self.calendar.is_trading_day_at(now) {
                    return false;
                }
                if self.allow_outside_windows || task.test_mode {
                    return true;
                }
                let t = self.calendar.time_of_day(now);
                windows.iter().any(|w| w.contains(t))
            }
            ScheduleKind::Slotted(slots) => {
                if !self.calendar.is_trading_day_at(now) {
                    return false;
                }
                if task.test_mode {
                    return true;
                }
                let local = self.calendar.local(now);
                let Some(latest) = slots.iter().filter_map(|s| s.latest_on_day(local)).max()
                else {
                    return false;
                };
                let latest = latest.with_timezone(&Utc);
                last_run.map_or(true, |ran| ran < latest)
            }
        }
    }
}
