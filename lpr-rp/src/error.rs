//! Error types for lpr-rp
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use lpr_common::model::PipelineState;
use thiserror::Error;

/// Main error type for the recognition pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Inference did not return within the configured bound
    #[error("Inference timed out after {timeout_ms}ms")]
    EngineTimeout { timeout_ms: u64 },

    /// Inference engine failed while running
    #[error("Inference engine error: {0}")]
    EngineRuntime(String),

    /// Inference engine was already disposed
    #[error("Inference engine disposed")]
    EngineDisposed,

    /// Inference engine could not be loaded or warmed up
    #[error("Inference engine load failed: {0}")]
    EngineLoad(String),

    /// Lifecycle operation called out of order
    #[error("Cannot {operation} while pipeline is {state}")]
    IllegalStateTransition {
        state: PipelineState,
        operation: &'static str,
    },

    /// Pipeline control loop is no longer running
    #[error("Pipeline control loop has shut down")]
    PipelineClosed,

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// lpr-common error
    #[error(transparent)]
    Common(#[from] lpr_common::Error),
}

/// Convenience Result type using lpr-rp Error
pub type Result<T> = std::result::Result<T, Error>;
