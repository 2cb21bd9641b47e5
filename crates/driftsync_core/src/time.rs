//! Wall-clock access.
//!
//! Archive decisions depend on "now" and on the local calendar day, so both
//! come from an injected [`TimeSource`].

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use driftsync_protocol::Timestamp;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time and calendar days.
pub trait TimeSource: Send + Sync + Debug {
    /// Current time in milliseconds since the epoch.
    fn now(&self) -> Timestamp;

    /// Calendar day (`YYYY-MM-DD`) containing `ts`.
    fn day_string(&self, ts: Timestamp) -> String;

    /// Start of the calendar day containing `ts`.
    fn start_of_day(&self, ts: Timestamp) -> Timestamp;

    /// Today's calendar day.
    fn today(&self) -> String {
        self.day_string(self.now())
    }
}

/// System clock in the local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp_millis()
    }

    fn day_string(&self, ts: Timestamp) -> String {
        match Local.timestamp_millis_opt(ts).earliest() {
            Some(dt) => dt.format("%Y-%m-%d").to_string(),
            None => utc_day_string(ts),
        }
    }

    fn start_of_day(&self, ts: Timestamp) -> Timestamp {
        Local
            .timestamp_millis_opt(ts)
            .earliest()
            .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
            .map_or_else(|| utc_start_of_day(ts), |dt| dt.timestamp_millis())
    }
}

/// A settable clock using UTC days, for tests and tools.
#[derive(Debug)]
pub struct FixedTimeSource {
    now: AtomicI64,
}

impl FixedTimeSource {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Creates a clock frozen at `hour:00` UTC on the given day.
    #[must_use]
    pub fn at(year: i32, month: u32, day: u32, hour: u32) -> Self {
        let ts = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .map_or(0, |dt| dt.and_utc().timestamp_millis());
        Self::new(ts)
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward by `ms`.
    pub fn advance(&self, ms: Timestamp) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    fn day_string(&self, ts: Timestamp) -> String {
        utc_day_string(ts)
    }

    fn start_of_day(&self, ts: Timestamp) -> Timestamp {
        utc_start_of_day(ts)
    }
}

fn utc_day_string(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn utc_start_of_day(ts: Timestamp) -> Timestamp {
    ts - ts.rem_euclid(crate::config::DAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DAY_MS;

    #[test]
    fn fixed_clock_days() {
        let clock = FixedTimeSource::at(2024, 3, 10, 15);
        assert_eq!(clock.today(), "2024-03-10");

        let start = clock.start_of_day(clock.now());
        assert_eq!(clock.now() - start, 15 * 60 * 60 * 1000);
        assert_eq!(clock.day_string(start - 1), "2024-03-09");

        clock.advance(DAY_MS);
        assert_eq!(clock.today(), "2024-03-11");
    }

    #[test]
    fn system_clock_start_of_day_is_not_after_now() {
        let clock = SystemTimeSource;
        let now = clock.now();
        let start = clock.start_of_day(now);
        assert!(start <= now);
        assert!(now - start <= DAY_MS + 60 * 60 * 1000);
    }
}
