//! Sensor details, index and view routes backed by the map service.

use crate::api::handlers::{
    MapResponse, bad_request, format_timestamp, map_internal_error, parse_unit,
};
use crate::api::responses::{
    ActiveSensorsResponse, LogsStatus, MapErrorCode, OwnerSuccessResponse, SensorAqiResponse,
    SensorDetailsResponse, SensorStatusResponse, ViewSuccessResponse,
};
use crate::aqi::Standard;
use crate::clock::TimeRange;
use crate::coordinator::{FetchKind, LogsOutcome};
use crate::pipeline::MapService;
use crate::telemetry::TelemetrySource;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

/// Time window in epoch seconds; missing bounds default to today.
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub standard: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub kind: Option<FetchKind>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewUpdate {
    pub unit: Option<String>,
    pub standard: Option<String>,
}

fn resolve_window(today: TimeRange, query: &WindowQuery) -> Result<TimeRange, String> {
    let range = TimeRange::new(
        query.start.unwrap_or(today.start),
        query.end.unwrap_or(today.end),
    );
    if range.is_empty() {
        return Err(format!("empty window {}..{}", range.start, range.end));
    }
    Ok(range)
}

fn parse_standard(raw: Option<&str>) -> Result<Option<Standard>, String> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => raw.parse().map(Some),
        None => Ok(None),
    }
}

fn timestamp_or_error<T>(route: &str) -> Result<String, MapResponse<T>> {
    format_timestamp(SystemTime::now())
        .map_err(|_| map_internal_error(route, "timestamp formatting failure"))
}

pub async fn open_sensor<S: TelemetrySource>(
    State(service): State<Arc<MapService<S>>>,
    Path(sensor_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> MapResponse<SensorDetailsResponse> {
    const ROUTE: &str = "/api/sensors/{id}/open";
    let range = match resolve_window(service.today_window(), &query) {
        Ok(range) => range,
        Err(message) => return bad_request(MapErrorCode::InvalidWindow, message, SystemTime::now()),
    };
    let details = match service.open_sensor(&sensor_id, range).await {
        Ok(details) => details,
        Err(err) => return map_internal_error(ROUTE, &err.to_string()),
    };

    let (status, logs) = match details.logs {
        LogsOutcome::Loaded(logs) => (LogsStatus::Loaded, logs),
        LogsOutcome::NotLoaded => (LogsStatus::NotLoaded, Vec::new()),
        LogsOutcome::Failed => (
            LogsStatus::Failed,
            service
                .coordinator()
                .last_logs(&sensor_id, FetchKind::Details)
                .unwrap_or_default(),
        ),
    };
    let timestamp = match timestamp_or_error(ROUTE) {
        Ok(timestamp) => timestamp,
        Err(response) => return response,
    };

    MapResponse::Success(SensorDetailsResponse {
        load_state: service.load_state(&sensor_id, FetchKind::Details),
        progress: service.progress(&sensor_id, FetchKind::Details),
        sensor_id,
        status,
        logs,
        owner: details.owner,
        timestamp,
    })
}

pub async fn close_sensor<S: TelemetrySource>(
    State(service): State<Arc<MapService<S>>>,
    Path(sensor_id): Path<String>,
) -> StatusCode {
    service.close_sensor(&sensor_id);
    StatusCode::NO_CONTENT
}

pub async fn get_status<S: TelemetrySource>(
    State(service): State<Arc<MapService<S>>>,
    Path(sensor_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> MapResponse<SensorStatusResponse> {
    let kind = query.kind.unwrap_or(FetchKind::Details);
    let timestamp = match timestamp_or_error("/api/sensors/{id}/status") {
        Ok(timestamp) => timestamp,
        Err(response) => return response,
    };
    MapResponse::Success(SensorStatusResponse {
        load_state: service.load_state(&sensor_id, kind),
        progress: service.progress(&sensor_id, kind),
        sensor_id,
        kind,
        timestamp,
    })
}

pub async fn get_aqi<S: TelemetrySource>(
    State(service): State<Arc<MapService<S>>>,
    Path(sensor_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> MapResponse<SensorAqiResponse> {
    const ROUTE: &str = "/api/sensors/{id}/aqi";
    let now = SystemTime::now();
    let range = match resolve_window(service.today_window(), &query) {
        Ok(range) => range,
        Err(message) => return bad_request(MapErrorCode::InvalidWindow, message, now),
    };
    let standard = match parse_standard(query.standard.as_deref()) {
        Ok(Some(standard)) => standard,
        Ok(None) => match service.state().read() {
            Ok(guard) => guard.standard(),
            Err(_) => return map_internal_error(ROUTE, "state lock poisoned while reading view"),
        },
        Err(message) => return bad_request(MapErrorCode::InvalidStandard, message, now),
    };

    let aqi = service.sensor_aqi(&sensor_id, range, standard).await;
    let timestamp = match timestamp_or_error(ROUTE) {
        Ok(timestamp) => timestamp,
        Err(response) => return response,
    };
    MapResponse::Success(SensorAqiResponse {
        sensor_id,
        standard,
        window: range,
        index: aqi.index,
        source: aqi.source,
        timestamp,
    })
}

pub async fn get_owner<S: TelemetrySource>(
    State(service): State<Arc<MapService<S>>>,
    Path(sensor_id): Path<String>,
) -> MapResponse<OwnerSuccessResponse> {
    let owner = service.owner(&sensor_id).await;
    let timestamp = match timestamp_or_error("/api/sensors/{id}/owner") {
        Ok(timestamp) => timestamp,
        Err(response) => return response,
    };
    MapResponse::Success(OwnerSuccessResponse {
        sensor_id,
        owner,
        timestamp,
    })
}

pub async fn get_active<S: TelemetrySource>(
    State(service): State<Arc<MapService<S>>>,
    Query(query): Query<WindowQuery>,
) -> MapResponse<ActiveSensorsResponse> {
    let range = match resolve_window(service.today_window(), &query) {
        Ok(range) => range,
        Err(message) => return bad_request(MapErrorCode::InvalidWindow, message, SystemTime::now()),
    };
    let sensors = service.active_sensors(range).await;
    let timestamp = match timestamp_or_error("/api/sensors/active") {
        Ok(timestamp) => timestamp,
        Err(response) => return response,
    };
    MapResponse::Success(ActiveSensorsResponse {
        window: range,
        sensors,
        timestamp,
    })
}

/// Change the active unit and/or standard; today's markers are reloaded for
/// the new view before answering.
pub async fn put_view<S: TelemetrySource>(
    State(service): State<Arc<MapService<S>>>,
    Json(update): Json<ViewUpdate>,
) -> MapResponse<ViewSuccessResponse> {
    const ROUTE: &str = "/api/view";
    let now = SystemTime::now();
    let unit = match parse_unit(update.unit.as_deref()) {
        Ok(unit) => unit,
        Err(message) => return bad_request(MapErrorCode::InvalidUnit, message, now),
    };
    let standard = match parse_standard(update.standard.as_deref()) {
        Ok(standard) => standard,
        Err(message) => return bad_request(MapErrorCode::InvalidStandard, message, now),
    };

    let (view, refreshed) = match service.select_view(unit, standard).await {
        Ok(result) => result,
        Err(err) => return map_internal_error(ROUTE, &err.to_string()),
    };
    info!(unit = view.unit.key(), refreshed, "View updated over API");
    let timestamp = match timestamp_or_error(ROUTE) {
        Ok(timestamp) => timestamp,
        Err(response) => return response,
    };
    MapResponse::Success(ViewSuccessResponse {
        unit: view.unit,
        standard: view.standard,
        refreshed,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::cache::{CacheSettings, DayCache};
    use crate::clock::ManualClock;
    use crate::coordinator::LoadState;
    use crate::pipeline::AqiSource;
    use crate::state::AppState;
    use crate::telemetry::mock::{MockCall, MockSource};
    use crate::telemetry::{GeoPoint, OwnerInfo, PointSnapshot, Reading};
    use crate::zones::Unit;
    use std::sync::RwLock;
    use time::UtcOffset;
    use tokio::sync::Notify;

    // 2024-03-05T12:00:00Z
    const NOW_SECS: i64 = 1_709_640_000;
    const TODAY_START: i64 = 1_709_596_800;

    fn service(source: MockSource) -> (Arc<MapService<MockSource>>, Arc<MockSource>) {
        let source = Arc::new(source);
        let cache = Arc::new(DayCache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::at_secs(NOW_SECS)),
            CacheSettings::default(),
        ));
        let state = Arc::new(RwLock::new(AppState::default()));
        let service = MapService::new(Arc::clone(&source), cache, state, UtcOffset::UTC);
        (Arc::new(service), source)
    }

    fn hourly(hours: i64) -> Vec<Reading> {
        (0..hours)
            .map(|h| Reading::new(TODAY_START + h * 3_600 + 60).with("pm25", 5.0))
            .collect()
    }

    #[tokio::test]
    async fn open_reports_logs_owner_and_progress() {
        let owner = OwnerInfo {
            owner: "0xabc".to_string(),
            address: None,
        };
        let (service, _) = service(
            MockSource::new()
                .with_logs("a", hourly(3))
                .with_owner("a", owner.clone()),
        );

        let response = open_sensor(
            State(Arc::clone(&service)),
            Path("a".to_string()),
            Query(WindowQuery::default()),
        )
        .await;

        match response {
            MapResponse::Success(body) => {
                assert_eq!(body.status, LogsStatus::Loaded);
                assert_eq!(body.logs.len(), 3);
                assert_eq!(body.owner, Some(owner));
                assert_eq!(body.load_state, LoadState::Done);
                assert_eq!(body.progress.map(|p| p.loaded_days), Some(1));
            }
            MapResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }

        let status = get_status(
            State(service),
            Path("a".to_string()),
            Query(StatusQuery::default()),
        )
        .await;
        match status {
            MapResponse::Success(body) => assert_eq!(body.load_state, LoadState::Done),
            MapResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[tokio::test]
    async fn close_cancels_pending_open() {
        let (service, source) = service(MockSource::new());
        let gate = Arc::new(Notify::new());
        source.push_call(MockCall::logs(hourly(2)).gated(gate));

        let pending = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                open_sensor(
                    State(service),
                    Path("a".to_string()),
                    Query(WindowQuery::default()),
                )
                .await
            })
        };
        tokio::task::yield_now().await;

        let closed = close_sensor(State(Arc::clone(&service)), Path("a".to_string())).await;

        assert_eq!(closed, StatusCode::NO_CONTENT);
        match pending.await.expect("open task") {
            MapResponse::Success(body) => {
                assert_eq!(body.status, LogsStatus::NotLoaded);
                assert!(body.logs.is_empty());
                assert_eq!(body.load_state, LoadState::Idle);
            }
            MapResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[tokio::test]
    async fn empty_window_is_rejected() {
        let (service, source) = service(MockSource::new());
        let query = WindowQuery {
            start: Some(NOW_SECS),
            end: Some(NOW_SECS),
            standard: None,
        };

        let response = open_sensor(State(service), Path("a".to_string()), Query(query)).await;

        match response {
            MapResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body.error_code, MapErrorCode::InvalidWindow);
            }
            MapResponse::Success(_) => panic!("expected invalid window response"),
        }
        assert_eq!(source.log_calls(), 0);
    }

    #[tokio::test]
    async fn aqi_route_computes_with_view_standard() {
        let (service, _) = service(MockSource::new().with_logs("a", hourly(6)));

        let response = get_aqi(
            State(service),
            Path("a".to_string()),
            Query(WindowQuery::default()),
        )
        .await;

        match response {
            MapResponse::Success(body) => {
                assert_eq!(body.standard, Standard::Epa2024);
                assert_eq!(body.index, Some(28));
                assert_eq!(body.source, AqiSource::Computed);
                assert_eq!(body.window, TimeRange::new(TODAY_START, TODAY_START + 86_400));
            }
            MapResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[tokio::test]
    async fn aqi_route_rejects_unknown_standard() {
        let (service, source) = service(MockSource::new());
        let query = WindowQuery {
            standard: Some("who2021".to_string()),
            ..WindowQuery::default()
        };

        let response = get_aqi(State(service), Path("a".to_string()), Query(query)).await;

        match response {
            MapResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body.error_code, MapErrorCode::InvalidStandard);
            }
            MapResponse::Success(_) => panic!("expected invalid standard response"),
        }
        assert_eq!(source.log_calls(), 0);
    }

    #[tokio::test]
    async fn view_change_refreshes_markers_for_new_unit() {
        let (service, source) = service(MockSource::new().with_points(vec![PointSnapshot {
            sensor_id: "a".to_string(),
            position: GeoPoint::new(59.9, 30.3),
            value: Some(70.0),
            timestamp: NOW_SECS,
            has_owner: false,
        }]));
        let update = ViewUpdate {
            unit: Some("pm10".to_string()),
            standard: None,
        };

        let response = put_view(State(Arc::clone(&service)), Json(update)).await;

        match response {
            MapResponse::Success(body) => {
                assert_eq!(body.unit, Unit::Pm10);
                assert_eq!(body.refreshed, 1);
            }
            MapResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
        assert_eq!(source.maxima_calls(), 1);
        let guard = service.state().read().expect("state lock");
        assert_eq!(guard.unit(), Unit::Pm10);
        let markers = guard.classified_markers(None);
        assert_eq!(markers[0].label, "Moderate");
    }

    #[tokio::test]
    async fn active_route_lists_sensors() {
        let (service, _) = service(MockSource::new().with_points(vec![PointSnapshot {
            sensor_id: "a".to_string(),
            position: GeoPoint::new(59.9, 30.3),
            value: None,
            timestamp: NOW_SECS,
            has_owner: false,
        }]));

        let response = get_active(State(service), Query(WindowQuery::default())).await;

        match response {
            MapResponse::Success(body) => assert_eq!(body.sensors, vec!["a".to_string()]),
            MapResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }
}
