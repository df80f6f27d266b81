//! Unified error types for Tally

use thiserror::Error;

/// Unified error type for Tally operations
#[derive(Error, Debug)]
pub enum TallyError {
    // Validation errors
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown metric type: {0}")]
    UnknownKind(String),

    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    #[error("Metric not found: {0}")]
    NotFound(String),

    // Security errors
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    // Transport errors
    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl TallyError {
    /// True for errors caused by malformed caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TallyError::MissingField(_) | TallyError::UnknownKind(_) | TallyError::InvalidMetric(_)
        )
    }
}

/// Result type alias using TallyError
pub type Result<T> = std::result::Result<T, TallyError>;
