use thiserror::Error;

use crate::value::ValueKind;

/// A single argument could not be decoded into a handler parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArgError {
    #[error("expected {expected}, found {found}")]
    Mismatch { expected: ValueKind, found: ValueKind },

    #[error("value {value} does not fit in {target}")]
    OutOfRange { value: i64, target: &'static str },

    #[error("json decode failed: {0}")]
    Decode(String),

    #[error("expected an output reference, found a value")]
    ExpectedOutput,

    #[error("output reference passed where a value was expected")]
    UnexpectedOutput,
}

/// Rejected subscription.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("handler declares {0} output parameters, at most one is allowed")]
    MultipleOutputs(usize),

    #[error("handler with an output parameter cannot be reached through the network")]
    UnsupportedPattern,
}

/// Failure of one handler invocation. Never aborts sibling handlers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("handler takes {expected} arguments, {found} supplied")]
    Arity { expected: usize, found: usize },

    #[error("argument {index}: {source}")]
    Argument {
        index: usize,
        #[source]
        source: ArgError,
    },

    #[error("output reference cannot be honoured for an event forwarded from another process")]
    UnsupportedPattern,

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("forwarding to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },
}
