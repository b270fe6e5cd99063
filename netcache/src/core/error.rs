use std::time::Duration;
use thiserror::Error;

/// Rejected configuration values
///
/// Raised synchronously by every `configure()` entry point. Invalid values are
/// never clamped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} = {value} exceeds {limit_field} = {limit}")]
    Exceeds {
        field: &'static str,
        value: u64,
        limit_field: &'static str,
        limit: u64,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    /// Shorthand for the common "must be non-zero" check
    pub fn require_non_zero(
        field: &'static str,
        value: u64,
    ) -> std::result::Result<(), ConfigError> {
        if value == 0 {
            Err(ConfigError::Zero { field })
        } else {
            Ok(())
        }
    }
}

/// Errors raised by a persistent store adapter
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Errors produced by a transport before any HTTP status is known
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Terminal failure of a scheduled request
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NetworkError {
    /// HTTP status of the last failed attempt, if the server answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Main error type for netcache operations
#[derive(Debug, Error)]
pub enum NetcacheError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for netcache operations
pub type Result<T> = std::result::Result<T, NetcacheError>;
