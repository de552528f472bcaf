use crate::aqi::Standard;
use crate::clock::TimeRange;
use crate::coordinator::{FetchKind, LoadState, ProgressEvent};
use crate::markers::ClassifiedMarker;
use crate::pipeline::AqiSource;
use crate::telemetry::{OwnerInfo, Reading, SensorId};
use crate::zones::Unit;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MarkersSuccessResponse {
    pub unit: Unit,
    pub standard: Standard,
    pub markers: Vec<ClassifiedMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_radius_px: Option<u32>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterSuccessResponse {
    pub unit: Unit,
    pub color: &'static str,
    pub child_count: usize,
    pub valued_count: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum LogsStatus {
    Loaded,
    NotLoaded,
    Failed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SensorDetailsResponse {
    pub sensor_id: SensorId,
    pub status: LogsStatus,
    /// Fresh logs when loaded, the last good ones after a failure.
    pub logs: Vec<Reading>,
    pub owner: Option<OwnerInfo>,
    pub load_state: LoadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEvent>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SensorStatusResponse {
    pub sensor_id: SensorId,
    pub kind: FetchKind,
    pub load_state: LoadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEvent>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SensorAqiResponse {
    pub sensor_id: SensorId,
    pub standard: Standard,
    pub window: TimeRange,
    pub index: Option<u16>,
    pub source: AqiSource,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct OwnerSuccessResponse {
    pub sensor_id: SensorId,
    pub owner: Option<OwnerInfo>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ActiveSensorsResponse {
    pub window: TimeRange,
    pub sensors: Vec<SensorId>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ViewSuccessResponse {
    pub unit: Unit,
    pub standard: Standard,
    pub refreshed: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MapErrorResponse {
    pub error_code: MapErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapErrorCode {
    InvalidUnit,
    InvalidStandard,
    InvalidWindow,
    InternalError,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub markers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthErrorResponse {
    pub error_code: HealthErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthErrorCode {
    InternalError,
}
