//! Common error types for CAS

use thiserror::Error;

/// Common result type for CAS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the CAS crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed striking data
    #[error("Format error at line {line}: {reason}")]
    Format { line: usize, reason: String },

    /// Invalid input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a format error at a given (1-based) line
    pub fn format(line: usize, reason: impl Into<String>) -> Self {
        Error::Format {
            line,
            reason: reason.into(),
        }
    }
}
