//! Effect-level error type.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by an external collaborator.
///
/// Every variant carries plain strings so the error can be cloned into step
/// results and task records without holding on to transport types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EffectError {
    /// The collaborator could not be reached.
    #[error("request to {service} failed: {message}")]
    Request { service: String, message: String },

    /// The collaborator answered with a non-success HTTP status.
    #[error("{service} responded with status {status}")]
    Status { service: String, status: u16 },

    /// The collaborator's response body was not the JSON we expected.
    #[error("could not decode {service} response: {message}")]
    Decode { service: String, message: String },

    /// No endpoint is configured for the capability.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// The call did not finish within the caller-supplied deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The collaborator reported a failure of its own.
    #[error("{0}")]
    Failed(String),
}
