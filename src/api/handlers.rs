use crate::api::responses::{
    ClusterSuccessResponse, HealthErrorCode, HealthErrorResponse, HealthStatus,
    HealthSuccessResponse, MapErrorCode, MapErrorResponse, MarkersSuccessResponse,
};
use crate::state::AppState;
use crate::telemetry::SensorId;
use crate::zones::Unit;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
pub(crate) enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkersQuery {
    pub unit: Option<String>,
    pub zoom: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClusterQuery {
    /// Comma-separated sensor ids
    pub ids: Option<String>,
    pub unit: Option<String>,
}

pub enum MapResponse<T> {
    Success(T),
    Error {
        status: StatusCode,
        body: MapErrorResponse,
    },
}

impl<T: serde::Serialize> IntoResponse for MapResponse<T> {
    fn into_response(self) -> Response {
        match self {
            MapResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            MapResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub type MarkersResponse = MapResponse<MarkersSuccessResponse>;
pub type ClusterResponse = MapResponse<ClusterSuccessResponse>;

pub async fn get_markers(
    State(state): State<Arc<RwLock<AppState>>>,
    Query(query): Query<MarkersQuery>,
) -> impl IntoResponse {
    build_markers_response(state, &query, SystemTime::now())
}

pub async fn get_cluster(
    State(state): State<Arc<RwLock<AppState>>>,
    Query(query): Query<ClusterQuery>,
) -> impl IntoResponse {
    build_cluster_response(state, &query, SystemTime::now())
}

pub enum HealthResponse {
    Success {
        status: StatusCode,
        body: HealthSuccessResponse,
    },
    Error {
        status: StatusCode,
        body: HealthErrorResponse,
    },
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        match self {
            HealthResponse::Success { status, body } => (status, Json(body)).into_response(),
            HealthResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_health(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_health_response(state, SystemTime::now())
}

pub(crate) fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

fn fallback_timestamp() -> String {
    format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format error timestamp");
        "1970-01-01T00:00:00Z".to_string()
    })
}

pub(crate) fn parse_unit(raw: Option<&str>) -> Result<Option<Unit>, String> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => raw.parse().map(Some),
        None => Ok(None),
    }
}

fn build_markers_response(
    state: Arc<RwLock<AppState>>,
    query: &MarkersQuery,
    now: SystemTime,
) -> MarkersResponse {
    let unit = match parse_unit(query.unit.as_deref()) {
        Ok(unit) => unit,
        Err(message) => return invalid_unit_response(message, now),
    };

    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return map_internal_error("/api/markers", "state lock poisoned while reading markers");
        }
    };
    let view = guard.view();
    let markers = guard.classified_markers(unit);
    drop(guard);

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => {
            return map_internal_error("/api/markers", "timestamp formatting failure");
        }
    };

    MapResponse::Success(MarkersSuccessResponse {
        unit: unit.unwrap_or(view.unit),
        standard: view.standard,
        markers,
        cluster_radius_px: query.zoom.map(|zoom| view.cluster.radius_for_zoom(zoom)),
        timestamp,
    })
}

fn build_cluster_response(
    state: Arc<RwLock<AppState>>,
    query: &ClusterQuery,
    now: SystemTime,
) -> ClusterResponse {
    let unit = match parse_unit(query.unit.as_deref()) {
        Ok(unit) => unit,
        Err(message) => return invalid_unit_response(message, now),
    };
    let ids: Vec<SensorId> = query
        .ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return map_internal_error("/api/cluster", "state lock poisoned while reading markers");
        }
    };
    let unit = unit.unwrap_or(guard.unit());
    let style = guard.cluster_style(&ids, Some(unit));
    drop(guard);

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => {
            return map_internal_error("/api/cluster", "timestamp formatting failure");
        }
    };

    MapResponse::Success(ClusterSuccessResponse {
        unit,
        color: style.color,
        child_count: style.child_count,
        valued_count: style.valued_count,
        timestamp,
    })
}

fn invalid_unit_response<T>(message: String, now: SystemTime) -> MapResponse<T> {
    bad_request(MapErrorCode::InvalidUnit, message, now)
}

pub(crate) fn bad_request<T>(code: MapErrorCode, message: String, now: SystemTime) -> MapResponse<T> {
    warn!(?code, message = %message, "Rejected map request");
    match format_timestamp(now) {
        Ok(formatted) => MapResponse::Error {
            status: StatusCode::BAD_REQUEST,
            body: MapErrorResponse {
                error_code: code,
                error_message: message,
                timestamp: formatted,
            },
        },
        Err(_) => map_internal_error("request validation", "timestamp formatting failure"),
    }
}

pub(crate) fn map_internal_error<T>(route: &str, message: &str) -> MapResponse<T> {
    error!(route, message, "Internal error while handling map request");
    MapResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: MapErrorResponse {
            error_code: MapErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: fallback_timestamp(),
        },
    }
}

fn build_health_response(state: Arc<RwLock<AppState>>, now: SystemTime) -> HealthResponse {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return health_internal_error("state lock poisoned while reading markers");
        }
    };
    let markers = guard.markers().len();
    let last_refresh = guard.last_refresh();
    drop(guard);

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => {
            return health_internal_error("timestamp formatting failure");
        }
    };
    let last_refresh = match last_refresh.map(format_timestamp).transpose() {
        Ok(formatted) => formatted,
        Err(_) => {
            return health_internal_error("timestamp formatting failure");
        }
    };

    // Never refreshed means the upstream has not answered yet.
    let status = if last_refresh.is_some() {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };

    HealthResponse::Success {
        status: StatusCode::OK,
        body: HealthSuccessResponse {
            status,
            markers,
            last_refresh,
            timestamp,
        },
    }
}

fn health_internal_error(message: &str) -> HealthResponse {
    error!(
        message = message,
        "Internal error while handling /api/health"
    );
    HealthResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: HealthErrorResponse {
            error_code: HealthErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: fallback_timestamp(),
        },
    }
}
