//! Node identity: role and the endpoint the bus listens on.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Bus node configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct NodeConfig {
    /// Bus role (server, client, network).
    #[validate(custom(function = validation::validate_role))]
    #[serde(default = "default_role")]
    pub role: String,

    /// Listen address, `host:port` or `:port` for all interfaces.
    #[validate(custom(function = validation::validate_address))]
    #[serde(default = "default_address")]
    pub address: String,

    /// Path the bus's RPC operations are exposed under.
    #[validate(custom(function = validation::validate_path))]
    #[serde(default = "default_path")]
    pub path: String,

    /// Address other nodes should dial back, when it differs from the bound one.
    #[validate(length(min = 1))]
    #[serde(default)]
    pub advertise_address: Option<String>,
}

fn default_role() -> String {
    "network".into()
}

fn default_address() -> String {
    "127.0.0.1:2010".into()
}

fn default_path() -> String {
    "/_evbus_".into()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            address: default_address(),
            path: default_path(),
            advertise_address: None,
        }
    }
}
