//! Per-sensor map markers.
//!
//! A marker is created the first time its id is seen and afterwards only ever
//! updated field by field, so a position update and a logs update arriving in
//! either order both survive.

use crate::jitter::spread_coincident;
use crate::telemetry::{GeoPoint, PointSnapshot, Reading, SensorId};
use crate::zones::cluster::{ClusterStyle, resolve_cluster_style};
use crate::zones::{Unit, classify};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerPoint {
    pub id: SensorId,
    pub position: Option<GeoPoint>,
    pub value: Option<f64>,
    /// Unit `value` is expressed in; a value is only ever colored with the
    /// zones of its own unit.
    pub unit: Option<Unit>,
    /// Sensor known but without data for the selected period.
    pub empty: bool,
    pub owner_present: bool,
    pub recent_logs: Vec<Reading>,
}

/// Field-level update; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerPatch {
    pub position: Option<GeoPoint>,
    pub value: Option<Option<f64>>,
    pub unit: Option<Unit>,
    pub empty: Option<bool>,
    pub owner_present: Option<bool>,
    pub recent_logs: Option<Vec<Reading>>,
}

impl MarkerPatch {
    pub fn from_snapshot(snapshot: &PointSnapshot, unit: Unit) -> Self {
        let value = snapshot.value.filter(|v| v.is_finite());
        Self {
            position: Some(snapshot.position).filter(GeoPoint::is_finite),
            value: Some(value),
            unit: Some(unit),
            empty: Some(value.is_none()),
            owner_present: Some(snapshot.has_owner),
            recent_logs: None,
        }
    }

    /// Known sensor with nothing to show for `unit`.
    pub fn vacant(unit: Unit) -> Self {
        Self {
            value: Some(None),
            unit: Some(unit),
            empty: Some(true),
            ..Self::default()
        }
    }

    pub fn logs(recent_logs: Vec<Reading>) -> Self {
        Self {
            recent_logs: Some(recent_logs),
            ..Self::default()
        }
    }
}

impl MarkerPoint {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            position: None,
            value: None,
            unit: None,
            empty: true,
            owner_present: false,
            recent_logs: Vec::new(),
        }
    }

    /// New record with `patch` applied on top of this one.
    pub fn merged(&self, patch: &MarkerPatch) -> Self {
        Self {
            id: self.id.clone(),
            position: patch.position.or(self.position),
            value: patch.value.unwrap_or(self.value),
            unit: patch.unit.or(self.unit),
            empty: patch.empty.unwrap_or(self.empty),
            owner_present: patch.owner_present.unwrap_or(self.owner_present),
            recent_logs: patch
                .recent_logs
                .clone()
                .unwrap_or_else(|| self.recent_logs.clone()),
        }
    }

    pub fn has_value(&self) -> bool {
        !self.empty && self.value.is_some_and(f64::is_finite)
    }

    /// Value usable under `unit`: present and measured in that unit.
    pub fn value_for(&self, unit: Unit) -> Option<f64> {
        if self.unit != Some(unit) || !self.has_value() {
            return None;
        }
        self.value
    }
}

/// Marker as handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedMarker {
    pub id: SensorId,
    pub position: GeoPoint,
    pub value: Option<f64>,
    pub color: &'static str,
    pub label: &'static str,
    pub no_data: bool,
    pub owner_present: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MarkerStore {
    markers: BTreeMap<SensorId, MarkerPoint>,
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, id: &str, patch: &MarkerPatch) -> &MarkerPoint {
        let next = match self.markers.get(id) {
            Some(existing) => existing.merged(patch),
            None => MarkerPoint::new(id).merged(patch),
        };
        self.markers.insert(id.to_string(), next);
        &self.markers[id]
    }

    pub fn get(&self, id: &str) -> Option<&MarkerPoint> {
        self.markers.get(id)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarkerPoint> {
        self.markers.values()
    }

    pub fn snapshot(&self) -> Vec<MarkerPoint> {
        self.markers.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }

    /// Placed and colored markers for `unit`. Markers without a position are
    /// not renderable and are left out; values of another unit show as no data.
    pub fn classify(&self, unit: Unit, jitter_radius_m: f64) -> Vec<ClassifiedMarker> {
        let placed = spread_coincident(
            self.markers
                .values()
                .filter_map(|m| Some((m.id.as_str(), m.position?))),
            jitter_radius_m,
        );
        self.markers
            .values()
            .filter_map(|marker| {
                let position = *placed.get(marker.id.as_str())?;
                let value = marker.value_for(unit);
                let style = classify(unit.zones(), value);
                Some(ClassifiedMarker {
                    id: marker.id.clone(),
                    position,
                    value,
                    color: style.color,
                    label: style.label,
                    no_data: style.no_data,
                    owner_present: marker.owner_present,
                })
            })
            .collect()
    }

    /// Style of the cluster formed by `ids`; unknown ids are ignored.
    pub fn cluster_style(&self, ids: &[SensorId], unit: Unit) -> ClusterStyle {
        let members = ids
            .iter()
            .filter_map(|id| self.markers.get(id))
            .map(|marker| (marker.id.as_str(), marker.value_for(unit)));
        resolve_cluster_style(members, unit.zones())
    }
}
