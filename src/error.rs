//! Error types for pairgate.

use std::time::Duration;

/// Top-level error type for running the service.
///
/// Pairing failures never reach this type: they are answered per request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors surfaced to a caller before or instead of a pairing code.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Pairing service is busy, retry after {retry_after:?}")]
    Busy { retry_after: Duration },

    #[error("Invalid target identifier: {reason}")]
    InvalidInput { reason: String },
}

/// Errors reported by a session transport.
///
/// `status_code` carries the remote status when the transport exposes one.
/// Classification prefers it over the free-text message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub status_code: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
        }
    }
}

/// Credential storage errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("Failed to wipe namespace {namespace}: {reason}")]
    WipeFailed { namespace: String, reason: String },

    #[error("Failed to read artifact for namespace {namespace}: {reason}")]
    ReadFailed { namespace: String, reason: String },

    #[error("Failed to persist credentials for namespace {namespace}: {reason}")]
    PersistFailed { namespace: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed { addr: String, reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
