//! RPC transport tuning.
//!
//! No timeout is applied unless configured: a slow subscriber stalls the
//! publisher's forwarding hop for as long as the connection stays open.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Transport configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct TransportConfig {
    /// Upper bound for establishing a connection (milliseconds).
    #[validate(range(min = 1, max = 600_000))]
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    /// Upper bound for a whole request/response exchange (milliseconds).
    #[validate(range(min = 1, max = 600_000))]
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    /// Largest accepted frame body (bytes).
    #[validate(range(min = 1024, max = 67_108_864))]
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            call_timeout_ms: None,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}
