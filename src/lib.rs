pub mod api;
pub mod aqi;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod jitter;
pub mod markers;
pub mod pipeline;
pub mod state;
pub mod telemetry;
pub mod zones;
