//! Realtime provider: readings are pushed in as they arrive and served from a
//! bounded per-sensor buffer.

use crate::clock::TimeRange;
use crate::telemetry::{
    GeoPoint, OwnerInfo, PointSnapshot, Reading, SensorId, SourceError, TelemetrySource,
};
use crate::zones::Unit;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 2_880;

#[derive(Debug)]
struct FeedEntry {
    position: Option<GeoPoint>,
    readings: VecDeque<Reading>,
}

#[derive(Debug)]
pub struct RealtimeFeed {
    capacity: usize,
    sensors: RwLock<BTreeMap<SensorId, FeedEntry>>,
}

impl RealtimeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sensors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record one pushed reading. Oldest readings are dropped past capacity.
    pub fn push(&self, sensor_id: &str, position: Option<GeoPoint>, reading: Reading) {
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        let entry = sensors
            .entry(sensor_id.to_string())
            .or_insert_with(|| FeedEntry {
                position: None,
                readings: VecDeque::new(),
            });
        if let Some(position) = position.filter(GeoPoint::is_finite) {
            entry.position = Some(position);
        }
        entry.readings.push_back(reading);
        while entry.readings.len() > self.capacity {
            entry.readings.pop_front();
        }
        debug!(sensor_id, buffered = entry.readings.len(), "realtime reading");
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for RealtimeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn in_range(reading: &Reading, range: TimeRange) -> bool {
    reading.timestamp >= range.start && reading.timestamp < range.end
}

impl TelemetrySource for RealtimeFeed {
    async fn logs(&self, sensor_id: &str, range: TimeRange) -> Result<Vec<Reading>, SourceError> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sensors
            .get(sensor_id)
            .map(|entry| {
                entry
                    .readings
                    .iter()
                    .filter(|reading| in_range(reading, range))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn maxima(&self, unit: Unit, range: TimeRange) -> Result<Vec<PointSnapshot>, SourceError> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        let mut points = Vec::new();
        for (sensor_id, entry) in sensors.iter() {
            let Some(position) = entry.position else {
                continue;
            };
            let mut best: Option<(f64, i64)> = None;
            for reading in entry.readings.iter().filter(|r| in_range(r, range)) {
                if let Some(&value) = reading.concentrations.get(unit.key())
                    && value.is_finite()
                    && best.is_none_or(|(max, _)| value > max)
                {
                    best = Some((value, reading.timestamp));
                }
            }
            points.push(PointSnapshot {
                sensor_id: sensor_id.clone(),
                position,
                value: best.map(|(value, _)| value),
                timestamp: best.map(|(_, ts)| ts).unwrap_or(0),
                has_owner: false,
            });
        }
        Ok(points)
    }

    async fn active_sensors(&self, range: TimeRange) -> Result<Vec<SensorId>, SourceError> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sensors
            .iter()
            .filter(|(_, entry)| entry.readings.iter().any(|r| in_range(r, range)))
            .map(|(id, _)| id.clone())
            .collect())
    }

    // The realtime network carries no ownership records.
    async fn owner(&self, _sensor_id: &str) -> Result<Option<OwnerInfo>, SourceError> {
        Ok(None)
    }
}
