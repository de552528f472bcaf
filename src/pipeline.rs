//! Map service: the glue between a telemetry source, the request
//! coordinator, the AQI engine, the day cache and the marker store.

use crate::aqi::{AqiEngine, Standard};
use crate::cache::DayCache;
use crate::clock::{self, TimeRange};
use crate::coordinator::owner::OwnerRegistry;
use crate::coordinator::{FetchKind, LoadState, LogCoordinator, LogsOutcome, ProgressEvent};
use crate::error::AppError;
use crate::markers::MarkerPatch;
use crate::state::{AppState, ViewSettings};
use crate::telemetry::{OwnerInfo, PointSnapshot, SensorId, TelemetrySource};
use crate::zones::Unit;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use time::{Date, UtcOffset};
use tracing::{debug, info, warn};

/// Cache entity under which per-unit point snapshots are stored.
pub const POINTS_ENTITY: &str = "points";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AqiSource {
    /// Served from a live cache entry for the exact window.
    Cached,
    /// Computed from freshly loaded logs.
    Computed,
    /// Last-known value shown because the fresh computation did not land.
    Provisional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorAqi {
    pub index: Option<u16>,
    pub source: AqiSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorDetails {
    pub logs: LogsOutcome,
    pub owner: Option<OwnerInfo>,
}

pub fn aqi_qualifier(standard: Standard, range: TimeRange) -> String {
    format!("aqi:{}:{}-{}", standard.key(), range.start, range.end)
}

pub struct MapService<S> {
    source: Arc<S>,
    cache: Arc<DayCache>,
    coordinator: LogCoordinator<S>,
    owners: OwnerRegistry,
    state: Arc<RwLock<AppState>>,
    offset: UtcOffset,
}

impl<S: TelemetrySource> MapService<S> {
    pub fn new(
        source: Arc<S>,
        cache: Arc<DayCache>,
        state: Arc<RwLock<AppState>>,
        offset: UtcOffset,
    ) -> Self {
        let coordinator = LogCoordinator::new(Arc::clone(&source), Arc::clone(&cache), offset);
        Self {
            source,
            cache,
            coordinator,
            owners: OwnerRegistry::new(),
            state,
            offset,
        }
    }

    pub fn state(&self) -> &Arc<RwLock<AppState>> {
        &self.state
    }

    pub fn cache(&self) -> &Arc<DayCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &LogCoordinator<S> {
        &self.coordinator
    }

    pub fn today(&self) -> Date {
        self.cache.today()
    }

    /// The whole local day containing now.
    pub fn today_window(&self) -> TimeRange {
        TimeRange::day(self.today(), self.offset)
    }

    /// Load per-sensor values of `unit` for `date` and merge them into the
    /// marker store. Known sensors missing from the snapshot are marked empty.
    ///
    /// AQI markers are not read from the upstream: sensors are placed from the
    /// PM2.5 snapshot and valued by the AQI engine, provisional values first.
    /// An upstream failure leaves the markers untouched and yields `Ok(0)`.
    pub async fn refresh_points(&self, date: Date, unit: Unit) -> Result<usize, AppError> {
        let snapshot_unit = if unit == Unit::Aqi { Unit::Pm25 } else { unit };
        let Some(points) = self.load_points(date, snapshot_unit).await else {
            return Ok(0);
        };
        if unit != Unit::Aqi {
            return self.merge_points(date, unit, &points);
        }

        let standard = self.state.read().map_err(|_| AppError::StateLock)?.standard();
        let range = TimeRange::day(date, self.offset);
        let provisional: Vec<(SensorId, MarkerPatch)> = points
            .iter()
            .filter_map(|point| {
                let index = self.provisional_aqi(&point.sensor_id, range)?;
                let snapshot = with_value(point, Some(f64::from(index)));
                Some((point.sensor_id.clone(), MarkerPatch::from_snapshot(&snapshot, unit)))
            })
            .collect();
        if !provisional.is_empty() {
            let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
            guard.apply_patches(provisional);
        }

        let mut computed = Vec::with_capacity(points.len());
        for point in &points {
            let aqi = self.sensor_aqi(&point.sensor_id, range, standard).await;
            computed.push(with_value(point, aqi.index.map(f64::from)));
        }
        self.merge_points(date, unit, &computed)
    }

    async fn load_points(&self, date: Date, unit: Unit) -> Option<Vec<PointSnapshot>> {
        if let Some(points) = self.cache.get::<Vec<PointSnapshot>>(date, POINTS_ENTITY, unit.key()) {
            debug!(%date, unit = unit.key(), "Points served from cache");
            return Some(points);
        }
        let range = TimeRange::day(date, self.offset);
        match self.source.maxima(unit, range).await {
            Ok(points) => {
                self.cache.set(date, POINTS_ENTITY, unit.key(), &points);
                Some(points)
            }
            Err(err) => {
                warn!(%date, unit = unit.key(), error = %err, "Points refresh failed");
                None
            }
        }
    }

    fn merge_points(&self, date: Date, unit: Unit, points: &[PointSnapshot]) -> Result<usize, AppError> {
        let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
        let seen: HashSet<&str> = points.iter().map(|p| p.sensor_id.as_str()).collect();
        let vanished: Vec<SensorId> = guard
            .markers()
            .iter()
            .filter(|marker| !seen.contains(marker.id.as_str()))
            .map(|marker| marker.id.clone())
            .collect();

        let mut patches: Vec<(SensorId, MarkerPatch)> = points
            .iter()
            .map(|point| (point.sensor_id.clone(), MarkerPatch::from_snapshot(point, unit)))
            .collect();
        patches.extend(vanished.into_iter().map(|id| (id, MarkerPatch::vacant(unit))));

        let applied = guard.apply_patches(patches);
        guard.mark_refreshed(SystemTime::now());
        info!(%date, unit = unit.key(), points = points.len(), applied, "Points refreshed");
        Ok(points.len())
    }

    /// Switch the active unit and/or standard, then reload today's markers
    /// for the resulting view.
    pub async fn select_view(
        &self,
        unit: Option<Unit>,
        standard: Option<Standard>,
    ) -> Result<(ViewSettings, usize), AppError> {
        let view = {
            let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
            if let Some(unit) = unit {
                guard.set_unit(unit);
            }
            if let Some(standard) = standard {
                guard.set_standard(standard);
            }
            guard.view()
        };
        info!(unit = view.unit.key(), standard = view.standard.key(), "View changed");
        let refreshed = self.refresh_points(self.today(), view.unit).await?;
        Ok((view, refreshed))
    }

    /// Last-known index of a sensor, available without waiting on the network.
    pub fn provisional_aqi(&self, sensor_id: &str, range: TimeRange) -> Option<u16> {
        self.cache.latest(self.window_date(range), sensor_id)
    }

    /// Index for `range` under `standard`. A live cached value is returned
    /// as is; otherwise logs are loaded and the computed value is cached. When
    /// the load is superseded or fails, the provisional value stands in.
    pub async fn sensor_aqi(
        &self,
        sensor_id: &str,
        range: TimeRange,
        standard: Standard,
    ) -> SensorAqi {
        let date = self.window_date(range);
        let qualifier = aqi_qualifier(standard, range);
        if let Some(index) = self.cache.get::<Option<u16>>(date, sensor_id, &qualifier) {
            return SensorAqi {
                index,
                source: AqiSource::Cached,
            };
        }

        let provisional = self.provisional_aqi(sensor_id, range);
        match self.coordinator.load(sensor_id, FetchKind::Aqi, range).await {
            LogsOutcome::Loaded(logs) => {
                let engine = AqiEngine::new(standard, self.offset);
                let index = engine.compute(&logs);
                self.cache.set(date, sensor_id, &qualifier, &index);
                SensorAqi {
                    index,
                    source: AqiSource::Computed,
                }
            }
            LogsOutcome::NotLoaded | LogsOutcome::Failed => SensorAqi {
                index: provisional,
                source: AqiSource::Provisional,
            },
        }
    }

    /// Open a sensor's details: load its logs for `range` and look up its
    /// owner concurrently, then merge both into the marker.
    pub async fn open_sensor(&self, sensor_id: &str, range: TimeRange) -> Result<SensorDetails, AppError> {
        let (logs, owner) = tokio::join!(
            self.coordinator.load(sensor_id, FetchKind::Details, range),
            self.owners.lookup(self.source.as_ref(), sensor_id),
        );

        let mut patch = MarkerPatch {
            owner_present: owner.as_ref().map(|_| true),
            ..MarkerPatch::default()
        };
        if let LogsOutcome::Loaded(readings) = &logs {
            patch.recent_logs = Some(readings.clone());
        }
        if patch != MarkerPatch::default() {
            let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
            guard.apply_patches([(sensor_id.to_string(), patch)]);
        }
        Ok(SensorDetails { logs, owner })
    }

    /// Abandon whatever the sensor's details view is still loading.
    pub fn close_sensor(&self, sensor_id: &str) {
        self.coordinator.cancel(sensor_id, FetchKind::Details);
    }

    pub fn load_state(&self, sensor_id: &str, kind: FetchKind) -> LoadState {
        self.coordinator.state(sensor_id, kind)
    }

    pub fn progress(&self, sensor_id: &str, kind: FetchKind) -> Option<ProgressEvent> {
        self.coordinator.progress(sensor_id, kind)
    }

    pub async fn owner(&self, sensor_id: &str) -> Option<OwnerInfo> {
        self.owners.lookup(self.source.as_ref(), sensor_id).await
    }

    /// Sensors active within `range`; empty when the source is unreachable.
    pub async fn active_sensors(&self, range: TimeRange) -> Vec<SensorId> {
        match self.source.active_sensors(range).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "Active sensor query failed");
                Vec::new()
            }
        }
    }

    fn window_date(&self, range: TimeRange) -> Date {
        clock::local_date(range.end.saturating_sub(1).max(range.start), self.offset)
    }
}

fn with_value(point: &PointSnapshot, value: Option<f64>) -> PointSnapshot {
    PointSnapshot {
        value,
        ..point.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use crate::cache::store::MemoryStore;
    use crate::clock::{ManualClock, SECONDS_PER_DAY};
    use crate::state::ViewSettings;
    use crate::telemetry::mock::{MockCall, MockSource};
    use crate::telemetry::{GeoPoint, Reading};
    use std::time::Duration;

    // 2024-03-05T12:00:00Z
    const NOW_SECS: i64 = 1_709_640_000;
    const TODAY_START: i64 = 1_709_596_800;

    struct Harness {
        service: MapService<MockSource>,
        source: Arc<MockSource>,
        clock: Arc<ManualClock>,
    }

    fn harness(source: MockSource) -> Harness {
        let source = Arc::new(source);
        let clock = Arc::new(ManualClock::at_secs(NOW_SECS));
        let cache = Arc::new(DayCache::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            CacheSettings::default(),
        ));
        let state = Arc::new(RwLock::new(AppState::new(ViewSettings::default())));
        Harness {
            service: MapService::new(source.clone(), cache, state, UtcOffset::UTC),
            source,
            clock,
        }
    }

    fn point(id: &str, value: Option<f64>) -> PointSnapshot {
        PointSnapshot {
            sensor_id: id.to_string(),
            position: GeoPoint::new(59.93, 30.33),
            value,
            timestamp: NOW_SECS,
            has_owner: false,
        }
    }

    fn hourly(hours: i64, pm25: f64) -> Vec<Reading> {
        (0..hours)
            .map(|h| Reading::new(TODAY_START + h * 3_600 + 60).with("pm25", pm25))
            .collect()
    }

    fn today_window() -> TimeRange {
        TimeRange::new(TODAY_START, TODAY_START + SECONDS_PER_DAY)
    }

    #[tokio::test]
    async fn refresh_points_uses_cache_until_ttl() -> Result<(), AppError> {
        let h = harness(MockSource::new().with_points(vec![point("a", Some(4.0))]));
        let today = h.service.today();

        assert_eq!(h.service.refresh_points(today, Unit::Pm25).await?, 1);
        assert_eq!(h.service.refresh_points(today, Unit::Pm25).await?, 1);
        assert_eq!(h.source.maxima_calls(), 1);

        h.clock.advance(Duration::from_secs(601));
        h.service.refresh_points(today, Unit::Pm25).await?;
        assert_eq!(h.source.maxima_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn vanished_sensor_is_marked_empty_not_removed() -> Result<(), AppError> {
        let h = harness(MockSource::new().with_points(vec![point("a", Some(4.0)), point("b", Some(8.0))]));
        let today = h.service.today();
        h.service.refresh_points(today, Unit::Pm25).await?;

        h.source.set_points(vec![point("a", Some(5.0))]);
        h.service.refresh_points(today, Unit::Pm10).await?;

        let guard = h.service.state().read().map_err(|_| AppError::StateLock)?;
        let b = guard.markers().get("b").cloned();
        assert_eq!(guard.markers().len(), 2);
        assert!(b.as_ref().is_some_and(|m| m.empty && m.value.is_none()));
        assert!(b.is_some_and(|m| m.position.is_some()));
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_keeps_markers() -> Result<(), AppError> {
        let h = harness(MockSource::new().with_points(vec![point("a", Some(4.0))]));
        let today = h.service.today();
        h.service.refresh_points(today, Unit::Pm25).await?;

        h.source.set_fail_maxima(true);
        assert_eq!(h.service.refresh_points(today, Unit::Pm10).await?, 0);

        let guard = h.service.state().read().map_err(|_| AppError::StateLock)?;
        assert_eq!(guard.markers().get("a").and_then(|m| m.value), Some(4.0));
        Ok(())
    }

    #[tokio::test]
    async fn sensor_aqi_computes_then_serves_cache() {
        let h = harness(MockSource::new().with_logs("a", hourly(6, 5.0)));
        let window = today_window();

        let first = h.service.sensor_aqi("a", window, Standard::Epa2024).await;
        assert_eq!(first.source, AqiSource::Computed);
        assert_eq!(first.index, Some(28));

        let second = h.service.sensor_aqi("a", window, Standard::Epa2024).await;
        assert_eq!(second, SensorAqi { index: Some(28), source: AqiSource::Cached });
        assert_eq!(h.service.provisional_aqi("a", window), Some(28));
    }

    #[tokio::test]
    async fn failed_load_falls_back_to_provisional_value() {
        let h = harness(MockSource::new().with_logs("a", hourly(6, 5.0)));
        let window = today_window();
        h.service.sensor_aqi("a", window, Standard::Epa2024).await;

        // Same local day, different window, so nothing is served from cache.
        h.source.push_call(MockCall::fail("offline"));
        let morning = TimeRange::new(TODAY_START, NOW_SECS);
        let fallback = h.service.sensor_aqi("a", morning, Standard::Epa2012).await;

        assert_eq!(fallback, SensorAqi { index: Some(28), source: AqiSource::Provisional });
        assert_eq!(h.service.load_state("a", FetchKind::Aqi), LoadState::Error);
    }

    #[tokio::test]
    async fn open_sensor_merges_logs_and_owner() -> Result<(), AppError> {
        let owner = OwnerInfo {
            owner: "0xabc".to_string(),
            address: Some("Nevsky 1".to_string()),
        };
        let h = harness(
            MockSource::new()
                .with_points(vec![point("a", Some(4.0))])
                .with_logs("a", hourly(2, 3.0))
                .with_owner("a", owner.clone()),
        );
        h.service.refresh_points(h.service.today(), Unit::Pm25).await?;

        let details = h.service.open_sensor("a", today_window()).await?;

        assert_eq!(details.owner, Some(owner));
        assert!(matches!(details.logs, LogsOutcome::Loaded(ref logs) if logs.len() == 2));
        let guard = h.service.state().read().map_err(|_| AppError::StateLock)?;
        let marker = guard.markers().get("a").cloned();
        assert!(marker.as_ref().is_some_and(|m| m.owner_present));
        assert_eq!(marker.as_ref().map(|m| m.recent_logs.len()), Some(2));
        assert_eq!(marker.and_then(|m| m.value), Some(4.0));
        Ok(())
    }

    #[tokio::test]
    async fn aqi_markers_are_valued_by_the_engine() -> Result<(), AppError> {
        let h = harness(
            MockSource::new()
                .with_points(vec![point("a", Some(999.0))])
                .with_logs("a", hourly(6, 5.0)),
        );

        assert_eq!(h.service.refresh_points(h.service.today(), Unit::Aqi).await?, 1);

        let guard = h.service.state().read().map_err(|_| AppError::StateLock)?;
        let marker = guard.markers().get("a").cloned();
        assert_eq!(marker.as_ref().and_then(|m| m.value), Some(28.0));
        assert_eq!(marker.and_then(|m| m.unit), Some(Unit::Aqi));
        assert_eq!(guard.classified_markers(Some(Unit::Aqi))[0].label, "Good");
        Ok(())
    }

    #[tokio::test]
    async fn aqi_marker_keeps_provisional_value_when_load_fails() -> Result<(), AppError> {
        let h = harness(
            MockSource::new()
                .with_points(vec![point("a", None)])
                .with_logs("a", hourly(6, 5.0)),
        );
        let morning = TimeRange::new(TODAY_START, NOW_SECS);
        h.service.sensor_aqi("a", morning, Standard::Epa2024).await;

        h.source.push_call(MockCall::fail("offline"));
        h.service.refresh_points(h.service.today(), Unit::Aqi).await?;

        let guard = h.service.state().read().map_err(|_| AppError::StateLock)?;
        let classified = guard.classified_markers(Some(Unit::Aqi));
        assert_eq!(classified[0].value, Some(28.0));
        assert!(!classified[0].no_data);
        Ok(())
    }

    #[tokio::test]
    async fn selecting_a_unit_reloads_markers_for_it() -> Result<(), AppError> {
        let h = harness(MockSource::new().with_points(vec![point("a", Some(40.0))]));
        h.service.refresh_points(h.service.today(), Unit::Pm25).await?;

        let (view, refreshed) = h.service.select_view(Some(Unit::Pm10), None).await?;

        assert_eq!(view.unit, Unit::Pm10);
        assert_eq!(refreshed, 1);
        assert_eq!(h.source.maxima_calls(), 2);
        let guard = h.service.state().read().map_err(|_| AppError::StateLock)?;
        let markers = guard.classified_markers(None);
        assert_eq!(markers[0].value, Some(40.0));
        assert_eq!(markers[0].label, "Good");
        Ok(())
    }
}
