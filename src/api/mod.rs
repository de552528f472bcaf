use crate::pipeline::MapService;
use crate::state::AppState;
use crate::telemetry::TelemetrySource;
use crate::telemetry::realtime::RealtimeFeed;
use axum::Router;
use axum::routing::{get, post, put};
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod ingest;
pub mod responses;
pub mod sensors;

pub fn router(state: Arc<RwLock<AppState>>) -> Router {
    Router::new()
        .route("/api/markers", get(handlers::get_markers))
        .route("/api/cluster", get(handlers::get_cluster))
        .route("/api/health", get(handlers::get_health))
        .with_state(state)
}

/// Per-sensor details, index and view routes driven by the map service.
pub fn service_router<S: TelemetrySource>(service: Arc<MapService<S>>) -> Router {
    Router::new()
        .route("/api/sensors/active", get(sensors::get_active::<S>))
        .route("/api/sensors/{id}/open", post(sensors::open_sensor::<S>))
        .route("/api/sensors/{id}/close", post(sensors::close_sensor::<S>))
        .route("/api/sensors/{id}/status", get(sensors::get_status::<S>))
        .route("/api/sensors/{id}/aqi", get(sensors::get_aqi::<S>))
        .route("/api/sensors/{id}/owner", get(sensors::get_owner::<S>))
        .route("/api/view", put(sensors::put_view::<S>))
        .with_state(service)
}

/// Routes accepting pushed readings for the realtime provider.
pub fn realtime_router(feed: Arc<RealtimeFeed>) -> Router {
    Router::new()
        .route("/api/realtime/readings", post(ingest::post_reading))
        .with_state(feed)
}
