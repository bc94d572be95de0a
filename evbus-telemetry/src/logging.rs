//! ## evbus-telemetry::logging
//! **Structured logging with `tracing`**
//!
//! The subscriber reads `RUST_LOG` and falls back to the level handed to
//! [`EventLogger::init_with_level`] (or `info`).

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber with the default `info` level.
    ///
    /// # Panics
    /// If a global subscriber has already been installed.
    pub fn init() {
        Self::init_with_level("info")
    }

    pub fn init_with_level(level: &str) {
        fmt()
            .with_env_filter(Self::filter(level))
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .init()
    }

    /// Like [`EventLogger::init_with_level`], but returns `false` instead of
    /// panicking when a subscriber is already installed.
    pub fn try_init(level: &str) -> bool {
        fmt()
            .with_env_filter(Self::filter(level))
            .with_thread_names(true)
            .try_init()
            .is_ok()
    }

    fn filter(level: &str) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    /// Records a lifecycle transition of a bus node.
    pub fn log_lifecycle(node: &str, transition: &str) {
        let span = tracing::info_span!("bus_lifecycle", node = node);
        let _guard = span.enter();
        tracing::info!(transition = transition, "Bus lifecycle transition");
    }
}
