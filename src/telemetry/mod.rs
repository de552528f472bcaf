//! Upstream telemetry API contract.
//!
//! The map core never owns a wire format: it consumes loosely-typed JSON and
//! substitutes safe defaults for anything missing or malformed.

use crate::clock::TimeRange;
use crate::zones::Unit;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;

pub mod http;
pub mod mock;
pub mod realtime;

pub type SensorId = String;

/// One raw sample: epoch seconds plus pollutant concentrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: i64,
    #[serde(default)]
    pub concentrations: BTreeMap<String, f64>,
}

impl Reading {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            concentrations: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.concentrations.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Latest (or period maximum) value of one unit for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSnapshot {
    pub sensor_id: SensorId,
    pub position: GeoPoint,
    pub value: Option<f64>,
    pub timestamp: i64,
    #[serde(default)]
    pub has_owner: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerInfo {
    pub owner: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("dns error: {0}")]
    Dns(String),
    #[error("connect error: {0}")]
    Connect(std::io::Error),
    #[error("io error: {0}")]
    Io(std::io::Error),
    #[error("http status {0} ({1})")]
    Http(u16, String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request timed out")]
    Timeout,
    #[error("scripted failure: {0}")]
    Scripted(String),
}

/// A provider of sensor telemetry.
///
/// One implementation exists per provider kind; the binary picks it once at
/// startup and everything downstream is generic over it.
pub trait TelemetrySource: Send + Sync + 'static {
    /// Raw readings of one sensor inside `range`.
    fn logs(
        &self,
        sensor_id: &str,
        range: TimeRange,
    ) -> impl Future<Output = Result<Vec<Reading>, SourceError>> + Send;

    /// Per-sensor maxima of `unit` over `range`.
    fn maxima(
        &self,
        unit: Unit,
        range: TimeRange,
    ) -> impl Future<Output = Result<Vec<PointSnapshot>, SourceError>> + Send;

    /// Sensors that reported anything inside `range`.
    fn active_sensors(
        &self,
        range: TimeRange,
    ) -> impl Future<Output = Result<Vec<SensorId>, SourceError>> + Send;

    /// Owner identity of a sensor, `None` when unknown.
    fn owner(
        &self,
        sensor_id: &str,
    ) -> impl Future<Output = Result<Option<OwnerInfo>, SourceError>> + Send;
}

/// Unwrap the `{"result": ...}` envelope used by the archive API.
pub fn unwrap_result(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn as_timestamp(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if let Some(int) = value.as_i64() {
        return Some(int);
    }
    let float = value.as_f64().or_else(|| value.as_str()?.parse().ok())?;
    float.is_finite().then(|| float.trunc() as i64)
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Parse a log payload. Non-array payloads yield no readings; entries without
/// a timestamp are skipped; non-numeric concentrations are dropped.
pub fn parse_readings(payload: &Value) -> Vec<Reading> {
    let Some(items) = payload.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let timestamp = as_timestamp(item.get("timestamp"))?;
            let concentrations = item
                .get("data")
                .or_else(|| item.get("concentrations"))
                .and_then(Value::as_object)
                .map(|data| {
                    data.iter()
                        .filter_map(|(key, value)| Some((key.to_ascii_lowercase(), as_number(value)?)))
                        .collect()
                })
                .unwrap_or_default();
            Some(Reading {
                timestamp,
                concentrations,
            })
        })
        .collect()
}

/// Parse a maxima/latest payload. Entries without finite coordinates are
/// skipped since they cannot be placed on the map.
pub fn parse_points(payload: &Value) -> Vec<PointSnapshot> {
    let Some(items) = payload.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let sensor_id = item
                .get("sensor_id")
                .or_else(|| item.get("id"))
                .and_then(Value::as_str)?
                .to_string();
            let geo = item.get("geo")?;
            let position = GeoPoint::new(
                geo.get("lat").and_then(as_number)?,
                geo.get("lng").and_then(as_number)?,
            );
            Some(PointSnapshot {
                sensor_id,
                position,
                value: item.get("value").and_then(as_number),
                timestamp: as_timestamp(item.get("timestamp")).unwrap_or(0),
                has_owner: item
                    .get("owner")
                    .is_some_and(|owner| owner.as_str().is_some_and(|s| !s.is_empty())),
            })
        })
        .collect()
}

pub fn parse_sensor_ids(payload: &Value) -> Vec<SensorId> {
    payload
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_owner(payload: &Value) -> Option<OwnerInfo> {
    let owner = payload.get("owner").and_then(Value::as_str)?;
    if owner.is_empty() {
        return None;
    }
    Some(OwnerInfo {
        owner: owner.to_string(),
        address: payload
            .get("address")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
