//! Wall-clock access and local calendar helpers.
//!
//! Everything that depends on "now" (cache TTL, the notion of "today") reads
//! it through [`Clock`] so tests can move time explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::{Date, OffsetDateTime, UtcOffset};

pub const SECONDS_PER_DAY: i64 = 86_400;

pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the unix epoch.
    fn now_ms(&self) -> i64;

    fn now_secs(&self) -> i64 {
        self.now_ms().div_euclid(1000)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
            Err(_) => 0,
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn at_secs(now_secs: i64) -> Self {
        Self::new(now_secs.saturating_mul(1000))
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Half-open range of epoch seconds, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// The whole local calendar day `date`.
    pub fn day(date: Date, offset: UtcOffset) -> Self {
        let start = date.midnight().assume_offset(offset).unix_timestamp();
        Self::new(start, start + SECONDS_PER_DAY)
    }

    /// Split into per-day slices along local midnights, oldest first.
    pub fn split_days(&self, offset: UtcOffset) -> Vec<(Date, TimeRange)> {
        let mut days = Vec::new();
        if self.is_empty() {
            return days;
        }
        let mut date = local_date(self.start, offset);
        loop {
            let whole = TimeRange::day(date, offset);
            if whole.start >= self.end {
                break;
            }
            days.push((
                date,
                TimeRange::new(whole.start.max(self.start), whole.end.min(self.end)),
            ));
            match date.next_day() {
                Some(next) => date = next,
                None => break,
            }
        }
        days
    }
}

/// Local calendar date for an epoch-seconds timestamp.
pub fn local_date(timestamp: i64, offset: UtcOffset) -> Date {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset)
        .date()
}

pub fn today(clock: &dyn Clock, offset: UtcOffset) -> Date {
    local_date(clock.now_secs(), offset)
}

/// `YYYY-MM-DD`, the partition key format of the cache.
pub fn date_key(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn offset_from_minutes(minutes: i32) -> UtcOffset {
    UtcOffset::from_whole_seconds(minutes.saturating_mul(60)).unwrap_or(UtcOffset::UTC)
}
