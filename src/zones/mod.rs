//! Visual classification of measurement values.
//!
//! A zone table is an ordered list of upper thresholds with a color and a
//! label; the last zone is open-ended. Missing values get a dedicated neutral
//! style so "no data" never looks like the lowest zone.

use serde::Serialize;

pub mod cluster;
mod tables;

pub use tables::Unit;

pub const NEUTRAL_COLOR: &str = "#a0a0a0";
pub const NEUTRAL_LABEL: &str = "No data";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Zone {
    /// Inclusive upper bound; `None` for the last, open-ended zone.
    pub threshold_max: Option<f64>,
    pub color: &'static str,
    pub label: &'static str,
}

impl Zone {
    pub const fn upto(threshold_max: f64, color: &'static str, label: &'static str) -> Self {
        Self {
            threshold_max: Some(threshold_max),
            color,
            label,
        }
    }

    pub const fn open(color: &'static str, label: &'static str) -> Self {
        Self {
            threshold_max: None,
            color,
            label,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoneStyle {
    pub color: &'static str,
    pub label: &'static str,
    pub no_data: bool,
}

impl ZoneStyle {
    pub const NO_DATA: ZoneStyle = ZoneStyle {
        color: NEUTRAL_COLOR,
        label: NEUTRAL_LABEL,
        no_data: true,
    };

    fn of(zone: &Zone) -> Self {
        Self {
            color: zone.color,
            label: zone.label,
            no_data: false,
        }
    }
}

/// Position of the zone `value` falls in, `None` for missing or NaN values
/// and for an empty table.
pub fn zone_index(zones: &[Zone], value: Option<f64>) -> Option<usize> {
    let value = value.filter(|v| !v.is_nan())?;
    zones
        .iter()
        .position(|zone| zone.threshold_max.is_some_and(|max| max >= value))
        .or_else(|| zones.len().checked_sub(1))
}

pub fn classify(zones: &[Zone], value: Option<f64>) -> ZoneStyle {
    zone_index(zones, value)
        .and_then(|index| zones.get(index))
        .map(ZoneStyle::of)
        .unwrap_or(ZoneStyle::NO_DATA)
}
