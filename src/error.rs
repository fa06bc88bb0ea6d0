//! Error types for attendance synchronization.

use std::time::Duration;
use thiserror::Error;

/// Main error type for coordinator operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Coordinator has been torn down")]
    Closed,
}

/// A push payload that could not be turned into an attendance event.
///
/// These never leave the channel's delivery path: the payload is logged and
/// dropped and the stream continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failures of the push connection. Recovered by reconnecting.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("No traffic for {0:?}")]
    IdleTimeout(Duration),
}

/// Failures of the REST snapshot fetch. Recovered by retrying with backoff.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Malformed response body: {0}")]
    Body(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::InvalidJson(e.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => TransportError::Status(status.as_u16()),
            None if e.is_body() || e.is_decode() => TransportError::Stream(e.to_string()),
            None => TransportError::Connect(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None if e.is_decode() => FetchError::Body(e.to_string()),
            None => FetchError::Request(e.to_string()),
        }
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, SyncError>;
