//! # Error Handling
//!
//! Error types for Arbor index operations.
//!
//! Every fallible index call returns [`Result`]. Lifecycle violations carry
//! the exact message callers see across the foreign-call boundary.

use thiserror::Error;

/// Result type alias for Arbor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for Arbor
#[derive(Error, Debug)]
pub enum Error {
    // Construction Errors
    #[error("Unknown metric: {name}")]
    UnknownMetric { name: String },

    // Input Errors
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid item id: {item}")]
    InvalidItem { item: i32 },

    // Lifecycle Errors
    #[error("{message}")]
    InvalidState { message: &'static str },

    #[error("Index corruption detected: {details}")]
    IndexCorruption { details: String },

    // System Errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Shorthand for a lifecycle violation
    pub fn invalid_state(message: &'static str) -> Self {
        Error::InvalidState { message }
    }

    /// Wrap an I/O error with the path or action it came from
    pub fn io(context: impl std::fmt::Display, source: std::io::Error) -> Self {
        Error::Io {
            message: format!("{}: {}", context, source),
            source,
        }
    }

    /// Get error code for log fields
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::UnknownMetric { .. } => "UNKNOWN_METRIC",
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::InvalidItem { .. } => "INVALID_ITEM",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::IndexCorruption { .. } => "INDEX_CORRUPTION",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
