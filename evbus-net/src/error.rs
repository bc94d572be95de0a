use std::time::Duration;

use thiserror::Error;

use evbus_core::{ArgError, DispatchError, RegistrationError};

use crate::node::{BusState, Role};
use crate::protocol::{Method, RemoteError};

/// Failure of one RPC exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("bind {address} failed: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("connection closed before a reply was received")]
    Closed,
}

/// Errors surfaced by [`Bus`](crate::Bus) operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("{endpoint} rejected {method}: {error}")]
    Remote {
        endpoint: String,
        method: Method,
        error: RemoteError,
    },

    #[error("{endpoint} answered {method} with an unexpected reply")]
    Protocol { endpoint: String, method: Method },

    #[error("{role} bus cannot {operation}")]
    Unsupported { role: Role, operation: &'static str },

    #[error("cannot {operation} a bus in state {state:?}")]
    InvalidState {
        state: BusState,
        operation: &'static str,
    },

    #[error("bus must be started to {0}")]
    NotStarted(&'static str),

    #[error("path {0} is already mounted on this listener")]
    PathInUse(String),

    #[error("query reply could not be decoded: {0}")]
    Decode(#[from] ArgError),

    #[error("configuration error: {0}")]
    Config(String),
}
