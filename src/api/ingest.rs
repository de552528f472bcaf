//! Push endpoint feeding the realtime provider.

use crate::telemetry::realtime::RealtimeFeed;
use crate::telemetry::{GeoPoint, Reading};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct PushedReading {
    pub sensor_id: String,
    #[serde(default)]
    pub geo: Option<GeoPoint>,
    pub timestamp: i64,
    #[serde(default)]
    pub data: BTreeMap<String, f64>,
}

pub async fn post_reading(
    State(feed): State<Arc<RealtimeFeed>>,
    Json(pushed): Json<PushedReading>,
) -> StatusCode {
    accept_reading(&feed, pushed)
}

fn accept_reading(feed: &RealtimeFeed, pushed: PushedReading) -> StatusCode {
    let sensor_id = pushed.sensor_id.trim();
    if sensor_id.is_empty() || pushed.timestamp < 0 {
        warn!(sensor_id, timestamp = pushed.timestamp, "Rejected pushed reading");
        return StatusCode::BAD_REQUEST;
    }
    let mut reading = Reading::new(pushed.timestamp);
    for (key, value) in pushed.data {
        if value.is_finite() {
            reading = reading.with(&key.to_ascii_lowercase(), value);
        }
    }
    feed.push(sensor_id, pushed.geo, reading);
    StatusCode::ACCEPTED
}
