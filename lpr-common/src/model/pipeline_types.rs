//! Pipeline lifecycle, operating mode and metrics types

use serde::{Deserialize, Serialize};

/// Lifecycle state of the recognition pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Degraded,
    Error,
    Disposed,
}

impl PipelineState {
    /// Frames are accepted only in these states
    pub fn is_processing(self) -> bool {
        matches!(self, PipelineState::Running | PipelineState::Degraded)
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Disposed
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
            PipelineState::Degraded => "degraded",
            PipelineState::Error => "error",
            PipelineState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Operating mode chosen by the degradation controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Normal,
    Degraded,
}

/// Advisory configuration change produced on a mode transition
///
/// `None` fields leave the current setting untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigDelta {
    pub sampling_interval_ms: Option<u64>,
    pub per_char_scoring: Option<bool>,
}

impl ConfigDelta {
    pub fn is_empty(&self) -> bool {
        self.sampling_interval_ms.is_none() && self.per_char_scoring.is_none()
    }
}

/// Class of inference failure
///
/// The classes are tracked separately but handled identically (skip, count, continue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Runtime,
    Disposed,
}

/// Why a frame or detection did not produce a recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Frame arrived while the pipeline was not running
    NotRunning,
    /// Frame arrived before the sampling interval elapsed
    SamplingInterval,
    /// Text could not be normalized
    InvalidFormat,
    /// Raw score was NaN
    OutOfRange,
    /// Fused confidence below the configured minimum
    LowConfidence,
    /// A per-character score below the configured minimum
    LowCharConfidence,
}

/// Skip-reason counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SkipCounters {
    pub not_running: u64,
    pub sampling_interval: u64,
    pub invalid_format: u64,
    pub out_of_range: u64,
    pub low_confidence: u64,
    pub low_char_confidence: u64,
}

impl SkipCounters {
    pub fn record(&mut self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::NotRunning => &mut self.not_running,
            SkipReason::SamplingInterval => &mut self.sampling_interval,
            SkipReason::InvalidFormat => &mut self.invalid_format,
            SkipReason::OutOfRange => &mut self.out_of_range,
            SkipReason::LowConfidence => &mut self.low_confidence,
            SkipReason::LowCharConfidence => &mut self.low_char_confidence,
        };
        *counter += 1;
    }

    pub fn get(&self, reason: SkipReason) -> u64 {
        match reason {
            SkipReason::NotRunning => self.not_running,
            SkipReason::SamplingInterval => self.sampling_interval,
            SkipReason::InvalidFormat => self.invalid_format,
            SkipReason::OutOfRange => self.out_of_range,
            SkipReason::LowConfidence => self.low_confidence,
            SkipReason::LowCharConfidence => self.low_char_confidence,
        }
    }
}

/// Rolling latency statistics (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub samples: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

/// Read-only view of pipeline counters
///
/// Counters are monotonic for the life of one run and reset on restart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineMetricsSnapshot {
    pub frames_offered: u64,
    pub frames_sampled: u64,
    pub frames_imported: u64,
    /// Queued frames overwritten by a newer frame before dispatch
    pub frames_replaced: u64,
    pub inference_count: u64,
    pub inference_failures: u64,
    pub timeouts: u64,
    pub runtime_errors: u64,
    pub disposed_errors: u64,
    pub stale_results_discarded: u64,
    pub raw_detections: u64,
    pub recognitions_emitted: u64,
    pub recognitions_suppressed: u64,
    pub skips: SkipCounters,
    pub latency: LatencyPercentiles,
    pub mode: OperatingMode,
    pub captured_at_ms: i64,
}

impl PipelineMetricsSnapshot {
    /// Failures over attempts for this run, 0.0 when nothing ran yet
    pub fn failure_ratio(&self) -> f64 {
        if self.inference_count == 0 {
            0.0
        } else {
            self.inference_failures as f64 / self.inference_count as f64
        }
    }
}
