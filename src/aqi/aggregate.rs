//! Temporal aggregation of irregular readings.
//!
//! Readings are averaged per local calendar minute, minute averages per local
//! hour, and the most recent hours form the rolling window the index is
//! computed over. Buckets are ephemeral and never persisted.

use crate::telemetry::Reading;
use std::collections::BTreeMap;
use time::UtcOffset;

pub const MINUTE_SECS: i64 = 60;
pub const HOUR_SECS: i64 = 3_600;
/// Hours kept in the rolling window.
pub const WINDOW_HOURS: usize = 24;
/// Fewer populated hours than this leave the window undefined.
pub const MIN_WINDOW_HOURS: usize = 2;

/// Values grouped under one calendar minute or hour. `timestamp` is the
/// latest member timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    pub timestamp: i64,
    pub values: BTreeMap<String, Vec<f64>>,
}

impl Bucket {
    fn push(&mut self, timestamp: i64, key: &str, value: f64) {
        if self.values.is_empty() || timestamp > self.timestamp {
            self.timestamp = timestamp;
        }
        self.values.entry(key.to_string()).or_default().push(value);
    }

    pub fn averages(&self) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, values)| (key.clone(), mean(values)))
            .collect()
    }
}

/// Per-key mean over the kept hourly buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAverage {
    pub hours: usize,
    pub means: BTreeMap<String, f64>,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    offset_secs: i64,
}

impl Aggregator {
    pub fn new(offset: UtcOffset) -> Self {
        Self {
            offset_secs: i64::from(offset.whole_seconds()),
        }
    }

    fn slot(&self, timestamp: i64, width: i64) -> i64 {
        (timestamp + self.offset_secs).div_euclid(width)
    }

    /// Group readings by local minute. Negative and non-finite values are
    /// dropped at intake; readings left without values create no bucket.
    pub fn minute_buckets(&self, readings: &[Reading]) -> BTreeMap<i64, Bucket> {
        let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
        for reading in readings {
            for (key, &value) in &reading.concentrations {
                if !value.is_finite() || value < 0.0 {
                    continue;
                }
                buckets
                    .entry(self.slot(reading.timestamp, MINUTE_SECS))
                    .or_default()
                    .push(reading.timestamp, key, value);
            }
        }
        buckets
    }

    /// Re-bucket minute averages by local hour.
    pub fn hour_buckets(&self, minutes: &BTreeMap<i64, Bucket>) -> BTreeMap<i64, Bucket> {
        let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
        for minute in minutes.values() {
            for (key, value) in minute.averages() {
                buckets
                    .entry(self.slot(minute.timestamp, HOUR_SECS))
                    .or_default()
                    .push(minute.timestamp, &key, value);
            }
        }
        buckets
    }

    /// Mean of each key across the most recent [`WINDOW_HOURS`] hourly
    /// buckets, or `None` with fewer than [`MIN_WINDOW_HOURS`].
    pub fn window_average(&self, readings: &[Reading]) -> Option<WindowAverage> {
        if readings.is_empty() {
            return None;
        }
        let hours = self.hour_buckets(&self.minute_buckets(readings));
        let mut hours: Vec<Bucket> = hours.into_values().collect();
        hours.sort_by_key(|bucket| bucket.timestamp);
        let kept = &hours[hours.len().saturating_sub(WINDOW_HOURS)..];
        if kept.len() < MIN_WINDOW_HOURS {
            return None;
        }

        let mut collected: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for bucket in kept {
            for (key, value) in bucket.averages() {
                collected.entry(key).or_default().push(value);
            }
        }
        Some(WindowAverage {
            hours: kept.len(),
            means: collected
                .into_iter()
                .map(|(key, values)| (key, mean(&values)))
                .collect(),
        })
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}
