//! Local-day arithmetic.
//!
//! "Once per local calendar day" is the deliberate semantics for the
//! scheduled-workflow guard and for notification dedup. The day boundary
//! is a configured UTC offset rather than something implicit in string
//! formatting, so the same database behaves identically wherever the
//! process runs.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};

/// Maps UTC instants onto the configured local calendar.
#[derive(Debug, Clone, Copy)]
pub struct DayClock {
    offset_minutes: i64,
}

impl DayClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self {
            // UTC-14..UTC+14 covers every real-world offset
            offset_minutes: i64::from(utc_offset_minutes.clamp(-14 * 60, 14 * 60)),
        }
    }

    fn shifted(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at + Duration::minutes(self.offset_minutes)
    }

    /// Local calendar day of an instant.
    pub fn local_day(&self, at: DateTime<Utc>) -> NaiveDate {
        self.shifted(at).date_naive()
    }

    /// Local calendar day of "now" for a scan tick.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local_day(now)
    }

    pub fn same_local_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.local_day(a) == self.local_day(b)
    }

    /// Minutes elapsed since local midnight.
    pub fn minutes_of_day(&self, at: DateTime<Utc>) -> i64 {
        let t = self.shifted(at).time();
        i64::from(t.hour()) * 60 + i64::from(t.minute())
    }

    /// Local weekday of an instant.
    pub fn weekday(&self, at: DateTime<Utc>) -> Weekday {
        self.shifted(at).date_naive().weekday()
    }
}
