//! Deterministic offsets that pull apart markers sharing a position.

use crate::telemetry::GeoPoint;
use std::collections::HashMap;
use std::f64::consts::TAU;

pub const METERS_PER_DEGREE: f64 = 111_320.0;
pub const DEFAULT_RADIUS_M: f64 = 25.0;
// Floor for cos(latitude) so longitude offsets stay bounded at the poles.
const MIN_LATITUDE_SCALE: f64 = 0.01;
// Coordinates equal to this many decimal places count as coincident.
const COINCIDENT_SCALE: f64 = 1e6;

/// 32-bit FNV-1a over the seed bytes.
pub fn stable_hash(seed: &str) -> u32 {
    seed.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Move `position` by at most `radius_m` meters in a direction and distance
/// derived only from `seed`. Non-finite input is returned unchanged.
pub fn jitter(position: GeoPoint, seed: &str, radius_m: f64) -> GeoPoint {
    if !position.is_finite() || !radius_m.is_finite() || radius_m <= 0.0 {
        return position;
    }
    let hash = stable_hash(seed);
    let angle = f64::from(hash & 0xffff) / 65_536.0 * TAU;
    let distance = f64::from(hash >> 16) / 65_535.0 * radius_m;

    let north_m = distance * angle.sin();
    let east_m = distance * angle.cos();
    let latitude_scale = position.lat.to_radians().cos().abs().max(MIN_LATITUDE_SCALE);

    GeoPoint::new(
        position.lat + north_m / METERS_PER_DEGREE,
        position.lng + east_m / (METERS_PER_DEGREE * latitude_scale),
    )
}

fn coincident_key(position: GeoPoint) -> (i64, i64) {
    (
        (position.lat * COINCIDENT_SCALE).round() as i64,
        (position.lng * COINCIDENT_SCALE).round() as i64,
    )
}

/// Jitter only the points that share a position with another point; lone
/// points keep their coordinates.
pub fn spread_coincident<'a, I>(points: I, radius_m: f64) -> HashMap<&'a str, GeoPoint>
where
    I: IntoIterator<Item = (&'a str, GeoPoint)>,
{
    let points: Vec<(&str, GeoPoint)> = points.into_iter().collect();
    let mut occupancy: HashMap<(i64, i64), usize> = HashMap::new();
    for (_, position) in points.iter().filter(|(_, p)| p.is_finite()) {
        *occupancy.entry(coincident_key(*position)).or_default() += 1;
    }
    points
        .into_iter()
        .map(|(id, position)| {
            let shared = position.is_finite()
                && occupancy
                    .get(&coincident_key(position))
                    .is_some_and(|count| *count > 1);
            let placed = if shared {
                jitter(position, id, radius_m)
            } else {
                position
            };
            (id, placed)
        })
        .collect()
}
