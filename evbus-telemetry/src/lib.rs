//! # evbus Telemetry
//!
//! Logging and metrics shared by the evbus crates.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::BusMetrics;
