//! # evbus Configuration System
//!
//! Layered configuration for bus nodes.
//!
//! ## Features
//! - **Unified Configuration**: node identity, transport tuning and telemetry in one tree
//! - **Validation**: every loaded configuration is validated before use
//! - **Environment Awareness**: per-environment override files and `EVBUS_*` variables

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

mod error;
mod node;
mod telemetry;
mod transport;
mod validation;

pub use error::ConfigError;
pub use node::NodeConfig;
pub use telemetry::TelemetryConfig;
pub use transport::TransportConfig;

/// Prefix of environment overrides, e.g. `EVBUS_NODE__ADDRESS`.
pub const ENV_PREFIX: &str = "EVBUS_";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct EvbusConfig {
    /// Role and endpoint of this node.
    #[validate(nested)]
    #[serde(default)]
    pub node: NodeConfig,

    /// RPC transport parameters.
    #[validate(nested)]
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging and metrics.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl EvbusConfig {
    /// Load configuration from the `config/` directory and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/evbus.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<EVBUS_ENV>.yaml` - Environment‑specific overrides.
    /// 4. `EVBUS_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_dir("config")
    }

    /// Same hierarchy as [`EvbusConfig::load`], rooted at `dir`.
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let mut figment = Figment::from(Serialized::defaults(EvbusConfig::default()));

        let base = dir.join("evbus.yaml");
        if base.exists() {
            figment = figment.merge(Yaml::file(&base));
        } else {
            debug!(path = %base.display(), "Base configuration not found, using defaults");
        }

        let env = std::env::var("EVBUS_ENV").unwrap_or_else(|_| "production".into());
        let env_file = dir.join(format!("{}.yaml", env));
        if env_file.exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file plus environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment = Figment::from(Serialized::defaults(EvbusConfig::default()))
            .merge(Yaml::file(path));
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
