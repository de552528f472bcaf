//! Air-quality index computation.
//!
//! Raw readings flow through [`aggregate`] (minute → hour → rolling window),
//! then each pollutant mean is mapped to a sub-index by [`mapper`] using the
//! breakpoint table of the selected [`Standard`]. [`engine`] ties it together.

pub mod aggregate;
pub mod breakpoints;
pub mod engine;
pub mod mapper;

pub use breakpoints::{Breakpoint, BreakpointTable, IndexZone, Pollutant, Standard};
pub use engine::{AqiEngine, IndexBreakdown};

pub const MAX_INDEX: u16 = 500;
