use crate::aqi::MAX_INDEX;
use crate::aqi::aggregate::Aggregator;
use crate::aqi::breakpoints::{Pollutant, Standard};
use crate::aqi::mapper::concentration_to_index;
use crate::telemetry::Reading;
use serde::Serialize;
use std::collections::BTreeMap;
use time::UtcOffset;

/// Result of one index computation with the per-pollutant detail behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexBreakdown {
    pub index: u16,
    pub dominant: Pollutant,
    pub sub_indices: BTreeMap<Pollutant, u16>,
    pub hours: usize,
}

/// Rolling-window AQI for one standard.
#[derive(Debug, Clone, Copy)]
pub struct AqiEngine {
    standard: Standard,
    aggregator: Aggregator,
}

impl AqiEngine {
    pub fn new(standard: Standard, offset: UtcOffset) -> Self {
        Self {
            standard,
            aggregator: Aggregator::new(offset),
        }
    }

    pub fn standard(&self) -> Standard {
        self.standard
    }

    /// Index over `logs`, or `None` when the data cannot support one.
    pub fn compute(&self, logs: &[Reading]) -> Option<u16> {
        self.breakdown(logs).map(|breakdown| breakdown.index)
    }

    pub fn breakdown(&self, logs: &[Reading]) -> Option<IndexBreakdown> {
        let window = self.aggregator.window_average(logs)?;
        let table = self.standard.table();

        let mut sub_indices = BTreeMap::new();
        let mut dominant: Option<(Pollutant, f64)> = None;
        for (key, &mean) in &window.means {
            let Some(pollutant) = Pollutant::from_key(key) else {
                continue;
            };
            let Some(index) = concentration_to_index(mean, pollutant, table) else {
                continue;
            };
            sub_indices.insert(pollutant, clamp_index(index));
            if dominant.is_none_or(|(_, best)| index > best) {
                dominant = Some((pollutant, index));
            }
        }

        let (dominant, index) = dominant?;
        Some(IndexBreakdown {
            index: clamp_index(index),
            dominant,
            sub_indices,
            hours: window.hours,
        })
    }
}

fn clamp_index(index: f64) -> u16 {
    index.round().clamp(0.0, f64::from(MAX_INDEX)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqi::aggregate::HOUR_SECS;

    const BASE: i64 = 1_700_000_000 - 1_700_000_000 % HOUR_SECS;

    fn engine(standard: Standard) -> AqiEngine {
        AqiEngine::new(standard, UtcOffset::UTC)
    }

    fn hourly(values: &[(&str, f64)], hours: i64) -> Vec<Reading> {
        (0..hours)
            .map(|hour| {
                values.iter().fold(Reading::new(BASE + hour * HOUR_SECS), |reading, (key, value)| {
                    reading.with(key, *value)
                })
            })
            .collect()
    }

    #[test]
    fn good_pm25_day_stays_in_good_band() {
        let logs = hourly(&[("pm25", 5.0)], 24);
        let index = engine(Standard::Epa2024).compute(&logs);
        assert!(index.is_some_and(|v| v <= 50));
        assert_eq!(index, Some(28));
    }

    #[test]
    fn empty_and_single_hour_logs_are_undefined() {
        let engine = engine(Standard::Epa2024);
        assert_eq!(engine.compute(&[]), None);
        assert_eq!(engine.compute(&hourly(&[("pm25", 5.0)], 1)), None);
    }

    #[test]
    fn highest_sub_index_wins() {
        let logs = hourly(&[("pm25", 5.0), ("pm10", 200.0)], 4);

        let breakdown = engine(Standard::Epa2024).breakdown(&logs).expect("breakdown");

        assert_eq!(breakdown.dominant, Pollutant::Pm10);
        assert_eq!(breakdown.index, 123);
        assert_eq!(breakdown.sub_indices.get(&Pollutant::Pm25), Some(&28));
        assert_eq!(breakdown.hours, 4);
    }

    #[test]
    fn unknown_pollutants_only_is_undefined() {
        let logs = hourly(&[("co2", 800.0), ("temperature", 21.0)], 5);
        assert_eq!(engine(Standard::Epa2024).compute(&logs), None);
    }

    #[test]
    fn saturates_at_max_index() {
        let logs = hourly(&[("pm25", 5_000.0)], 3);
        assert_eq!(engine(Standard::Epa2012).compute(&logs), Some(MAX_INDEX));
    }

    #[test]
    fn repeated_calls_agree() {
        let logs = hourly(&[("pm25", 17.3), ("pm10", 40.0)], 12);
        let engine = engine(Standard::Epa2012);
        assert_eq!(engine.compute(&logs), engine.compute(&logs));
    }

    #[test]
    fn standards_share_engine_with_different_tables() {
        let logs = hourly(&[("pm25", 12.0)], 6);
        assert_eq!(engine(Standard::Epa2012).compute(&logs), Some(50));
        assert_eq!(engine(Standard::Epa2024).compute(&logs), Some(56));
    }
}
