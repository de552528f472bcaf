use crate::aqi::Standard;
use crate::jitter::DEFAULT_RADIUS_M;
use crate::markers::{ClassifiedMarker, MarkerPatch, MarkerPoint, MarkerStore};
use crate::telemetry::SensorId;
use crate::zones::Unit;
use crate::zones::cluster::{ClusterSettings, ClusterStyle};
use std::time::SystemTime;
use tokio::sync::watch;

/// Renderer-facing view settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSettings {
    pub unit: Unit,
    pub standard: Standard,
    pub jitter_radius_m: f64,
    pub cluster: ClusterSettings,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            unit: Unit::default(),
            standard: Standard::default(),
            jitter_radius_m: DEFAULT_RADIUS_M,
            cluster: ClusterSettings::default(),
        }
    }
}

#[derive(Debug)]
pub struct AppState {
    view: ViewSettings,
    markers: MarkerStore,
    markers_tx: watch::Sender<Vec<MarkerPoint>>,
    last_refresh: Option<SystemTime>,
}

impl AppState {
    pub fn new(view: ViewSettings) -> Self {
        let (markers_tx, _markers_rx) = watch::channel(Vec::new());
        Self {
            view,
            markers: MarkerStore::new(),
            markers_tx,
            last_refresh: None,
        }
    }

    pub fn view(&self) -> ViewSettings {
        self.view
    }

    pub fn unit(&self) -> Unit {
        self.view.unit
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.view.unit = unit;
    }

    pub fn standard(&self) -> Standard {
        self.view.standard
    }

    pub fn set_standard(&mut self, standard: Standard) {
        self.view.standard = standard;
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    pub fn subscribe_markers(&self) -> watch::Receiver<Vec<MarkerPoint>> {
        self.markers_tx.subscribe()
    }

    /// Merge `patches` into the marker store and publish the result once.
    pub fn apply_patches<I>(&mut self, patches: I) -> usize
    where
        I: IntoIterator<Item = (SensorId, MarkerPatch)>,
    {
        let mut applied = 0;
        for (id, patch) in patches {
            self.markers.upsert(&id, &patch);
            applied += 1;
        }
        if applied > 0 {
            self.markers_tx.send_replace(self.markers.snapshot());
        }
        applied
    }

    pub fn clear_markers(&mut self) {
        self.markers.clear();
        self.markers_tx.send_replace(Vec::new());
    }

    pub fn last_refresh(&self) -> Option<SystemTime> {
        self.last_refresh
    }

    pub fn mark_refreshed(&mut self, at: SystemTime) {
        self.last_refresh = Some(at);
    }

    /// Markers classified under `unit`, or the active unit when `None`.
    pub fn classified_markers(&self, unit: Option<Unit>) -> Vec<ClassifiedMarker> {
        self.markers
            .classify(unit.unwrap_or(self.view.unit), self.view.jitter_radius_m)
    }

    pub fn cluster_style(&self, ids: &[SensorId], unit: Option<Unit>) -> ClusterStyle {
        self.markers
            .cluster_style(ids, unit.unwrap_or(self.view.unit))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ViewSettings::default())
    }
}
