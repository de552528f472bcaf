use crate::zones::{NEUTRAL_COLOR, Zone, classify};
use serde::{Deserialize, Serialize};

/// Pixel radius used by the renderer to group markers at a zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ClusterSettings {
    pub radius_px: u32,
    pub min_radius_px: u32,
    /// Zoom level from which markers are never grouped.
    pub disable_at_zoom: u8,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            radius_px: 80,
            min_radius_px: 20,
            disable_at_zoom: 16,
        }
    }
}

impl ClusterSettings {
    /// Radius shrinks linearly from `radius_px` at zoom 0 towards
    /// `min_radius_px`, and is zero once clustering is disabled.
    pub fn radius_for_zoom(&self, zoom: u8) -> u32 {
        if self.disable_at_zoom == 0 || zoom >= self.disable_at_zoom {
            return 0;
        }
        let max = self.radius_px.max(self.min_radius_px);
        let span = max - self.min_radius_px;
        max - span * u32::from(zoom) / u32::from(self.disable_at_zoom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterStyle {
    pub color: &'static str,
    pub child_count: usize,
    pub valued_count: usize,
}

/// Majority zone color across a cluster of `(id, value)` members.
///
/// Members are visited in id order so ties go to the color that reached the
/// winning count first in that order. Members without a finite value count
/// towards `child_count` only.
pub fn resolve_cluster_style<'a, I>(members: I, zones: &[Zone]) -> ClusterStyle
where
    I: IntoIterator<Item = (&'a str, Option<f64>)>,
{
    let mut sorted: Vec<(&str, Option<f64>)> = members.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut tally: Vec<(&'static str, usize)> = Vec::new();
    let mut winner: Option<(&'static str, usize)> = None;
    for (_, value) in sorted.iter().filter(|(_, value)| value.is_some_and(f64::is_finite)) {
        let style = classify(zones, *value);
        if style.no_data {
            continue;
        }
        let count = match tally.iter_mut().find(|(color, _)| *color == style.color) {
            Some(entry) => {
                entry.1 += 1;
                entry.1
            }
            None => {
                tally.push((style.color, 1));
                1
            }
        };
        if winner.is_none_or(|(_, best)| count > best) {
            winner = Some((style.color, count));
        }
    }

    ClusterStyle {
        color: winner.map(|(color, _)| color).unwrap_or(NEUTRAL_COLOR),
        child_count: sorted.len(),
        valued_count: tally.iter().map(|(_, count)| count).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZONES: [Zone; 3] = [
        Zone::upto(50.0, "green", "Low"),
        Zone::upto(100.0, "yellow", "Medium"),
        Zone::open("red", "High"),
    ];

    fn marker(id: &str, value: Option<f64>) -> (&str, Option<f64>) {
        (id, value)
    }

    #[test]
    fn majority_color_wins() {
        let markers = [
            marker("a", Some(10.0)),
            marker("b", Some(20.0)),
            marker("c", Some(70.0)),
        ];
        let style = resolve_cluster_style(markers, &ZONES);
        assert_eq!(style.color, "green");
        assert_eq!(style.child_count, 3);
        assert_eq!(style.valued_count, 3);
    }

    #[test]
    fn ties_resolve_by_id_order_not_input_order() {
        let forward = [marker("b", Some(70.0)), marker("a", Some(10.0))];
        let backward = [marker("a", Some(10.0)), marker("b", Some(70.0))];
        assert_eq!(resolve_cluster_style(forward, &ZONES).color, "green");
        assert_eq!(resolve_cluster_style(backward, &ZONES).color, "green");
    }

    #[test]
    fn valueless_markers_only_count_as_children() {
        let markers = [
            marker("a", None),
            marker("b", None),
            marker("c", Some(150.0)),
        ];
        let style = resolve_cluster_style(markers, &ZONES);
        assert_eq!(style.color, "red");
        assert_eq!(style.child_count, 3);
        assert_eq!(style.valued_count, 1);
    }

    #[test]
    fn cluster_without_values_is_neutral() {
        let markers = [marker("a", None), marker("b", Some(f64::NAN))];
        let style = resolve_cluster_style(markers, &ZONES);
        assert_eq!(style.color, NEUTRAL_COLOR);
        assert_eq!(style.child_count, 2);
        assert_eq!(style.valued_count, 0);
    }

    #[test]
    fn radius_shrinks_with_zoom_and_disables() {
        let settings = ClusterSettings::default();
        assert_eq!(settings.radius_for_zoom(0), 80);
        assert_eq!(settings.radius_for_zoom(8), 50);
        assert_eq!(settings.radius_for_zoom(16), 0);
        assert!(settings.radius_for_zoom(15) >= settings.min_radius_px);
    }
}
