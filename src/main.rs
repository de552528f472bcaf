use aqi_map::api;
use aqi_map::cache::store::{CacheStore, FileStore, MemoryStore};
use aqi_map::cache::DayCache;
use aqi_map::clock::SystemClock;
use aqi_map::config::{self, Config, ProviderKind};
use aqi_map::error::AppError;
use aqi_map::pipeline::MapService;
use aqi_map::state::AppState;
use aqi_map::telemetry::TelemetrySource;
use aqi_map::telemetry::http::HttpSource;
use aqi_map::telemetry::realtime::RealtimeFeed;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

fn init_tracing(level: &str) {
    let level = level.parse().unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(&config.logging.level);
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "aqi-map starting"
    );

    let store: Arc<dyn CacheStore> = match config.cache_dir() {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Persisting cache partitions");
            Arc::new(FileStore::open(dir).map_err(AppError::from)?)
        }
        None => {
            tracing::info!("No cache dir configured, cache is memory-only");
            Arc::new(MemoryStore::new())
        }
    };
    let cache = Arc::new(DayCache::new(
        store,
        Arc::new(SystemClock),
        config.cache_settings(),
    ));
    let purged = cache.purge_foreign_versions();
    if purged > 0 {
        tracing::info!(purged, "Removed cache partitions of other versions");
    }

    let state = Arc::new(RwLock::new(AppState::new(config.view_settings())));

    // The provider is chosen once here; everything below is generic over it.
    match config.provider_kind() {
        ProviderKind::Remote => {
            let endpoint = config.provider_endpoint().ok_or(AppError::MissingEndpoint)?;
            tracing::info!(endpoint, "Using remote archive provider");
            let source = Arc::new(HttpSource::new(endpoint, config.provider_timeout()));
            serve(source, cache, state, &config, Router::new()).await
        }
        ProviderKind::Realtime => {
            tracing::info!("Using realtime provider");
            let feed = Arc::new(RealtimeFeed::default());
            let ingest = api::realtime_router(Arc::clone(&feed));
            serve(feed, cache, state, &config, ingest).await
        }
    }
}

async fn serve<S: TelemetrySource>(
    source: Arc<S>,
    cache: Arc<DayCache>,
    state: Arc<RwLock<AppState>>,
    config: &Config,
    extra_routes: Router,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(MapService::new(
        source,
        cache,
        Arc::clone(&state),
        config.utc_offset(),
    ));
    let _refresh_handle = spawn_refresh_task(Arc::clone(&service), config.refresh_interval());

    let app = api::router(state)
        .merge(api::service_router(Arc::clone(&service)))
        .merge(extra_routes);
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically reload today's points for the active unit.
fn spawn_refresh_task<S: TelemetrySource>(
    service: Arc<MapService<S>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tracing::info!(interval_secs = interval.as_secs(), "Starting marker refresh task");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let unit = match service.state().read() {
                Ok(guard) => guard.unit(),
                Err(_) => {
                    tracing::error!("State lock poisoned, stopping refresh task");
                    return;
                }
            };
            if let Err(err) = service.refresh_points(service.today(), unit).await {
                tracing::warn!(error = %err, "Marker refresh failed");
            }
        }
    })
}
