//! Common error types for the LPR crates

use thiserror::Error;

/// Common result type for LPR operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the recognition crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Recognized text could not be turned into a valid plate key
    ///
    /// Carries the raw text as received from the engine.
    #[error("Invalid plate format: {0:?}")]
    InvalidFormat(String),

    /// Confidence value is NaN or outside [0, 1]
    #[error("Confidence out of range: {0}")]
    OutOfRange(f64),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
