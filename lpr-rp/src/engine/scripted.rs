//! Scripted inference engine
//!
//! Answers `detect` calls from a table keyed by frame id. Used by the replay
//! CLI and by tests to reproduce engine behaviour (latency, failures,
//! panics, disposal) without a model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use lpr_common::model::{FailureKind, Frame, RawDetection};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{DetectOptions, EngineError, EngineInfo, InferenceEngine, LoadMode, LoadResult};

/// Scripted answer for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScriptedResponse {
    Detections {
        #[serde(default)]
        detections: Vec<RawDetection>,
        #[serde(default)]
        latency_ms: u64,
    },
    Failure {
        failure: FailureKind,
        #[serde(default)]
        latency_ms: u64,
    },
    /// Engine panics instead of answering
    Panic {
        #[serde(default)]
        latency_ms: u64,
    },
}

impl ScriptedResponse {
    pub fn detections(detections: Vec<RawDetection>, latency_ms: u64) -> Self {
        ScriptedResponse::Detections {
            detections,
            latency_ms,
        }
    }

    pub fn failure(failure: FailureKind, latency_ms: u64) -> Self {
        ScriptedResponse::Failure {
            failure,
            latency_ms,
        }
    }

    pub fn panic(latency_ms: u64) -> Self {
        ScriptedResponse::Panic { latency_ms }
    }

    fn latency_ms(&self) -> u64 {
        match self {
            ScriptedResponse::Detections { latency_ms, .. }
            | ScriptedResponse::Failure { latency_ms, .. }
            | ScriptedResponse::Panic { latency_ms } => *latency_ms,
        }
    }
}

impl Default for ScriptedResponse {
    fn default() -> Self {
        ScriptedResponse::detections(Vec::new(), 0)
    }
}

/// Engine driven by a response table
pub struct ScriptedEngine {
    info: EngineInfo,
    responses: Mutex<HashMap<String, ScriptedResponse>>,
    fallback: ScriptedResponse,
    load_failure: Option<String>,
    load_panics: bool,
    disposed: AtomicBool,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen_frames: Mutex<Vec<String>>,
    last_options: Mutex<Option<DetectOptions>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            info: EngineInfo {
                name: "scripted".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                input_width: 320,
                input_height: 320,
                supports_char_scores: true,
            },
            responses: Mutex::new(HashMap::new()),
            fallback: ScriptedResponse::default(),
            load_failure: None,
            load_panics: false,
            disposed: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen_frames: Mutex::new(Vec::new()),
            last_options: Mutex::new(None),
        }
    }

    /// Build from a prepared table
    pub fn with_responses(responses: HashMap<String, ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            ..Self::new()
        }
    }

    /// Response for frames missing from the table
    pub fn with_fallback(mut self, fallback: ScriptedResponse) -> Self {
        self.fallback = fallback;
        self
    }

    /// Make `load` fail with this message
    pub fn failing_load(mut self, message: impl Into<String>) -> Self {
        self.load_failure = Some(message.into());
        self
    }

    /// Make `load` panic
    pub fn panicking_load(mut self) -> Self {
        self.load_panics = true;
        self
    }

    pub async fn script(&self, frame_id: impl Into<String>, response: ScriptedResponse) {
        self.responses.lock().await.insert(frame_id.into(), response);
    }

    /// Number of `detect` calls received
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously outstanding `detect` calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Frame ids in the order `detect` saw them
    pub async fn seen_frames(&self) -> Vec<String> {
        self.seen_frames.lock().await.clone()
    }

    pub async fn last_options(&self) -> Option<DetectOptions> {
        self.last_options.lock().await.clone()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks outstanding calls even when the caller abandons the future
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl InferenceEngine for ScriptedEngine {
    fn metadata(&self) -> EngineInfo {
        self.info.clone()
    }

    async fn load(&self, mode: LoadMode) -> Result<LoadResult, EngineError> {
        if self.load_panics {
            panic!("scripted load panic");
        }
        if let Some(message) = &self.load_failure {
            return Err(EngineError::Runtime(message.clone()));
        }
        self.disposed.store(false, Ordering::SeqCst);
        Ok(LoadResult { mode, warmup_ms: 0 })
    }

    async fn detect(
        &self,
        frame: &Frame,
        options: &DetectOptions,
    ) -> Result<Vec<RawDetection>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        self.seen_frames.lock().await.push(frame.id.clone());
        *self.last_options.lock().await = Some(options.clone());

        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }

        let response = self
            .responses
            .lock()
            .await
            .get(&frame.id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        let latency = response.latency_ms();
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        debug!("Scripted engine answered frame {} after {}ms", frame.id, latency);

        match response {
            ScriptedResponse::Detections { detections, .. } => Ok(detections
                .into_iter()
                .take(options.max_detections.max(1))
                .collect()),
            ScriptedResponse::Failure { failure, .. } => Err(match failure {
                FailureKind::Timeout => EngineError::Timeout,
                FailureKind::Runtime => {
                    EngineError::Runtime(format!("scripted failure for frame {}", frame.id))
                }
                FailureKind::Disposed => EngineError::Disposed,
            }),
            ScriptedResponse::Panic { .. } => panic!("scripted panic for frame {}", frame.id),
        }
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}
