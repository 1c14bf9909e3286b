//! Inference engine boundary
//!
//! The engine itself (model loading, tensor execution, acceleration) lives
//! outside this crate. The pipeline only sees an async function that turns
//! a frame into a (possibly empty) list of raw detections or a typed failure.
//!
//! # Example
//! ```rust,ignore
//! use lpr_rp::engine::{InferenceEngine, EngineInfo, LoadMode, LoadResult, DetectOptions, EngineError};
//!
//! pub struct TfliteEngine { /* ... */ }
//!
//! #[async_trait::async_trait]
//! impl InferenceEngine for TfliteEngine {
//!     fn metadata(&self) -> EngineInfo { /* ... */ }
//!     async fn load(&self, mode: LoadMode) -> Result<LoadResult, EngineError> { /* ... */ }
//!     async fn detect(&self, frame: &Frame, options: &DetectOptions)
//!         -> Result<Vec<RawDetection>, EngineError> { /* ... */ }
//!     async fn dispose(&self) { /* ... */ }
//! }
//! ```

mod scripted;

pub use scripted::{ScriptedEngine, ScriptedResponse};

use lpr_common::model::{FailureKind, Frame, RawDetection};
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;

use crate::error::Error;

/// Static description of a loaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    /// Model input size in pixels
    pub input_width: u32,
    pub input_height: u32,
    /// Whether the engine can report per-character scores
    pub supports_char_scores: bool,
}

/// Execution backend requested at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    #[default]
    Cpu,
    Accelerated,
}

/// Outcome of a successful load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    /// Backend actually in use (may fall back from Accelerated to Cpu)
    pub mode: LoadMode,
    pub warmup_ms: u64,
}

/// Per-call inference options
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectOptions {
    /// Ask the engine to compute per-character scores
    pub per_char_scores: bool,
    pub max_detections: usize,
    pub region_hint: Option<String>,
}

/// Inference engine failures
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Inference timed out")]
    Timeout,

    #[error("Inference runtime error: {0}")]
    Runtime(String),

    #[error("Inference engine disposed")]
    Disposed,
}

impl EngineError {
    /// Metrics class of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Timeout => FailureKind::Timeout,
            EngineError::Runtime(_) => FailureKind::Runtime,
            EngineError::Disposed => FailureKind::Disposed,
        }
    }

    /// Runtime failure for an engine call whose task panicked or was aborted
    pub fn from_join(operation: &str, err: JoinError) -> Self {
        if !err.is_panic() {
            return EngineError::Runtime(format!("engine {} cancelled", operation));
        }
        let payload = err.into_panic();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        EngineError::Runtime(format!("engine {} panicked: {}", operation, message))
    }

    /// Pipeline error for this failure; `timeout_ms` is the bound the call ran under
    pub fn into_pipeline_error(self, timeout_ms: u64) -> Error {
        match self {
            EngineError::Timeout => Error::EngineTimeout { timeout_ms },
            EngineError::Runtime(msg) => Error::EngineRuntime(msg),
            EngineError::Disposed => Error::EngineDisposed,
        }
    }
}

/// External inference engine
///
/// Implementations must be safe to call from a spawned task; the scheduler
/// guarantees at most one `detect` call is outstanding at a time.
#[async_trait::async_trait]
pub trait InferenceEngine: Send + Sync {
    fn metadata(&self) -> EngineInfo;

    /// Load and warm the model
    async fn load(&self, mode: LoadMode) -> Result<LoadResult, EngineError>;

    /// Run recognition on one frame
    async fn detect(
        &self,
        frame: &Frame,
        options: &DetectOptions,
    ) -> Result<Vec<RawDetection>, EngineError>;

    /// Release the model; later `detect` calls must fail with `Disposed`
    async fn dispose(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(EngineError::Timeout.kind(), FailureKind::Timeout);
        assert_eq!(EngineError::Runtime("x".into()).kind(), FailureKind::Runtime);
        assert_eq!(EngineError::Disposed.kind(), FailureKind::Disposed);
    }

    #[test]
    fn test_engine_error_converts_to_pipeline_error() {
        let err = EngineError::Runtime("boom".into()).into_pipeline_error(500);
        assert!(matches!(err, Error::EngineRuntime(ref m) if m == "boom"));
        assert!(matches!(
            EngineError::Disposed.into_pipeline_error(500),
            Error::EngineDisposed
        ));
    }

    #[test]
    fn test_timeout_error_carries_configured_bound() {
        let err = EngineError::Timeout.into_pipeline_error(750);
        assert!(matches!(err, Error::EngineTimeout { timeout_ms: 750 }));
        assert_eq!(err.to_string(), "Inference timed out after 750ms");
    }

    #[tokio::test]
    async fn test_panicked_task_becomes_runtime_failure() {
        let join = tokio::spawn(async { panic!("tensor shape mismatch") })
            .await
            .unwrap_err();
        let err = EngineError::from_join("detect", join);
        assert_eq!(err.kind(), FailureKind::Runtime);
        assert_eq!(
            err,
            EngineError::Runtime("engine detect panicked: tensor shape mismatch".into())
        );
    }

    #[tokio::test]
    async fn test_aborted_task_becomes_runtime_failure() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let join = handle.await.unwrap_err();
        assert_eq!(
            EngineError::from_join("load", join),
            EngineError::Runtime("engine load cancelled".into())
        );
    }
}
