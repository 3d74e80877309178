//! Error types for the transport client.

use std::time::Duration;

use crate::codec::Encoding;

/// Handshake or open failure. `code` is the HTTP status or close code supplied by the peer,
/// when any.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", describe_connection_error(.code, .reason))]
pub struct ConnectionError {
    pub code: Option<u16>,
    pub reason: String,
}

fn describe_connection_error(code: &Option<u16>, reason: &str) -> String {
    match code {
        Some(code) => format!("connection failed ({}): {}", code, reason),
        None => format!("connection failed: {}", reason),
    }
}

/// An inbound frame that could not be decoded into an envelope.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed {encoding} envelope: {reason}")]
pub struct MalformedEnvelope {
    pub encoding: Encoding,
    pub reason: String,
}

/// A payload rejected by the caller-supplied validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

impl From<serde_json::Error> for ValidationError {
    fn from(e: serde_json::Error) -> Self {
        ValidationError(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Malformed(#[from] MalformedEnvelope),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),
    #[error("failed to encode envelope: {0}")]
    Encode(String),
    #[error("transport closed")]
    Closed,
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
