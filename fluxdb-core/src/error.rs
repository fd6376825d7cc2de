//! Error types for FluxDB

use thiserror::Error;

/// Result type alias for FluxDB operations
pub type Result<T> = std::result::Result<T, FluxError>;

/// FluxDB error types
#[derive(Error, Debug)]
pub enum FluxError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document id does not exist
    #[error("document not found: {0}")]
    NotFound(u64),

    /// A value was accessed as the wrong type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Persisted data could not be decoded
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Malformed client input (JSON or command arguments)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Database not found
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl FluxError {
    /// Check if error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, FluxError::Corruption(_))
    }
}
