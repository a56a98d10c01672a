//! Error types for cas-analyser
//!
//! Bad strike data is never an error inside the correction chain; it is
//! repaired or dropped with a warning. Errors here are for the outer surfaces:
//! configuration, unreadable input, and misuse of the pipeline.

use thiserror::Error;

/// Main error type for cas-analyser
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unrecognised or malformed input data
    #[error("Input error: {0}")]
    Input(String),

    /// Pipeline lifecycle errors
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Unknown estimator or estimator failure
    #[error("Estimator error: {0}")]
    Estimator(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared data model
    #[error(transparent)]
    Common(#[from] cas_common::Error),
}

/// Convenience Result type using cas-analyser Error
pub type Result<T> = std::result::Result<T, Error>;
