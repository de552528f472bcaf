use crate::aqi::MAX_INDEX;
use crate::aqi::breakpoints::{BreakpointTable, Pollutant};

/// Map one concentration to its sub-index by piecewise-linear interpolation.
///
/// Returns `None` for negative or non-finite input and for normalized values
/// that fall outside every breakpoint. Values above the top breakpoint
/// saturate at [`MAX_INDEX`].
pub fn concentration_to_index(
    concentration: f64,
    pollutant: Pollutant,
    table: &BreakpointTable,
) -> Option<f64> {
    if !concentration.is_finite() || concentration < 0.0 {
        return None;
    }
    let normalized = pollutant.normalize(concentration);
    let breakpoints = table.breakpoints(pollutant);
    let top = breakpoints.last()?;
    if normalized > top.concentration_max {
        return Some(f64::from(MAX_INDEX));
    }
    breakpoints
        .iter()
        .find(|breakpoint| breakpoint.contains(normalized))
        .map(|breakpoint| breakpoint.interpolate(normalized))
}
