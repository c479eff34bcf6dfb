//! WolfLog Error Types

use thiserror::Error;

/// Result type alias for WolfLog operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfLog error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Admission errors
    #[error("Quorum not reached: {healthy}/{required} nodes healthy")]
    NoQuorum { healthy: usize, required: usize },

    #[error("Write concern not met for id {sequence_id}: {shortfall} acknowledgment(s) missing")]
    WriteConcernNotMet { sequence_id: u64, shortfall: usize },

    // Replica errors
    #[error("Replica {replica} rejected request with status {status}")]
    ReplicaRejected { replica: String, status: u16 },

    #[error("Replica not found: {0}")]
    ReplicaNotFound(String),

    #[error("Replica configured not to reply")]
    NoReply,

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if a replica call that failed with this error may be retried.
    ///
    /// Server-side failures (5xx) and transport failures are retryable;
    /// client-side rejections (4xx) never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ReplicaRejected { status, .. } => (500..600).contains(status),
            Error::ConnectionTimeout(_)
            | Error::ConnectionFailed { .. }
            | Error::Network(_) => true,
            _ => false,
        }
    }

    /// Number of missing acknowledgments, if this is a write-concern failure
    pub fn shortfall(&self) -> Option<usize> {
        match self {
            Error::WriteConcernNotMet { shortfall, .. } => Some(*shortfall),
            _ => None,
        }
    }
}
