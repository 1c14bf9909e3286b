//! Configuration for the recognition pipeline
//!
//! Two layers:
//! 1. **TOML file**: `[logging]` and `[pipeline]` tables, resolved through
//!    `lpr_common::config` (CLI → ENV → user config dir → defaults)
//! 2. **Runtime snapshot**: `PipelineConfig`, handed to the orchestrator at
//!    spawn time and replaceable through `PipelineHandle::update_config`
//!
//! Every field has a built-in default, so an empty or missing file is valid.

use std::path::Path;

use lpr_common::config::{load_toml_or_default, ConfigFileResolver, LoggingConfig};
use lpr_common::model::ConfigDelta;
use serde::{Deserialize, Serialize};

use crate::engine::LoadMode;
use crate::error::{Error, Result};

/// Top-level TOML document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl TomlConfig {
    /// Resolve, load and validate the config file
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = ConfigFileResolver::new("lpr").resolve(cli_path);
        let config: TomlConfig = load_toml_or_default(path.as_deref())?;
        config.pipeline.validate()?;
        Ok(config)
    }
}

/// What happens when a plate reappears inside the dedup window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep the earlier entry, drop the newcomer
    #[default]
    KeepFirst,
    /// Replace the retained entry when the newcomer is strictly more confident
    KeepMaxConfidence,
}

/// Runtime pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Detections below this fused confidence are skipped
    #[serde(default = "default_min_fused_confidence")]
    pub min_fused_confidence: f64,

    /// Dedup horizon (ms)
    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: u64,

    /// Minimum gap between sampled live frames (ms)
    #[serde(default = "default_sampling_interval_ms")]
    pub sampling_interval_ms: u64,

    /// Soft deadline for one inference call (ms)
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,

    /// p95 latency above this counts toward degradation (ms)
    #[serde(default = "default_degrade_latency_threshold_ms")]
    pub degrade_latency_threshold_ms: u64,

    /// Number of recent attempts in the rolling statistics
    #[serde(default = "default_degrade_failure_window")]
    pub degrade_failure_window: usize,

    /// Failure ratio above this degrades immediately
    #[serde(default = "default_degrade_failure_ratio")]
    pub degrade_failure_ratio: f64,

    /// Attempts the window must hold before the failure ratio can degrade
    #[serde(default = "default_degrade_min_samples")]
    pub degrade_min_samples: usize,

    /// Consecutive slow evaluations before degrading
    #[serde(default = "default_degrade_consecutive_windows")]
    pub degrade_consecutive_windows: u32,

    /// p95 must stay below this to recover (ms)
    #[serde(default = "default_recover_latency_threshold_ms")]
    pub recover_latency_threshold_ms: u64,

    /// Failure ratio must stay below this to recover
    #[serde(default = "default_recover_failure_ratio")]
    pub recover_failure_ratio: f64,

    /// Consecutive healthy evaluations before recovering
    #[serde(default = "default_recover_consecutive_windows")]
    pub recover_consecutive_windows: u32,

    /// Sampling interval multiplier applied in degraded mode
    #[serde(default = "default_degraded_sampling_multiplier")]
    pub degraded_sampling_multiplier: f64,

    /// Enable the per-character score gate
    #[serde(default = "default_true")]
    pub per_char_scoring: bool,

    /// Minimum acceptable per-character score when the gate is enabled
    #[serde(default = "default_min_char_score")]
    pub min_char_score: f64,

    #[serde(default)]
    pub dedup_policy: DedupPolicy,

    /// Apply degradation deltas automatically (they are always advised on the event bus)
    #[serde(default = "default_true")]
    pub auto_apply_degradation: bool,

    /// Passed to the engine as an upper bound on detections per frame
    #[serde(default = "default_max_detections_per_frame")]
    pub max_detections_per_frame: usize,

    #[serde(default)]
    pub engine_load_mode: LoadMode,

    /// Optional region hint forwarded to normalization and the engine
    #[serde(default)]
    pub region_hint: Option<String>,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_min_fused_confidence() -> f64 {
    0.60
}
fn default_dedupe_window_ms() -> u64 {
    3_000
}
fn default_sampling_interval_ms() -> u64 {
    250
}
fn default_inference_timeout_ms() -> u64 {
    1_500
}
fn default_degrade_latency_threshold_ms() -> u64 {
    800
}
fn default_degrade_failure_window() -> usize {
    20
}
fn default_degrade_failure_ratio() -> f64 {
    0.30
}
fn default_degrade_min_samples() -> usize {
    5
}
fn default_degrade_consecutive_windows() -> u32 {
    3
}
fn default_recover_latency_threshold_ms() -> u64 {
    600
}
fn default_recover_failure_ratio() -> f64 {
    0.10
}
fn default_recover_consecutive_windows() -> u32 {
    5
}
fn default_degraded_sampling_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_min_char_score() -> f64 {
    0.30
}
fn default_max_detections_per_frame() -> usize {
    8
}
fn default_event_bus_capacity() -> usize {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_fused_confidence: default_min_fused_confidence(),
            dedupe_window_ms: default_dedupe_window_ms(),
            sampling_interval_ms: default_sampling_interval_ms(),
            inference_timeout_ms: default_inference_timeout_ms(),
            degrade_latency_threshold_ms: default_degrade_latency_threshold_ms(),
            degrade_failure_window: default_degrade_failure_window(),
            degrade_failure_ratio: default_degrade_failure_ratio(),
            degrade_min_samples: default_degrade_min_samples(),
            degrade_consecutive_windows: default_degrade_consecutive_windows(),
            recover_latency_threshold_ms: default_recover_latency_threshold_ms(),
            recover_failure_ratio: default_recover_failure_ratio(),
            recover_consecutive_windows: default_recover_consecutive_windows(),
            degraded_sampling_multiplier: default_degraded_sampling_multiplier(),
            per_char_scoring: true,
            min_char_score: default_min_char_score(),
            dedup_policy: DedupPolicy::default(),
            auto_apply_degradation: true,
            max_detections_per_frame: default_max_detections_per_frame(),
            engine_load_mode: LoadMode::default(),
            region_hint: None,
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, value: f64) -> Result<()> {
            if value.is_nan() || !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
            Ok(())
        }

        unit("min_fused_confidence", self.min_fused_confidence)?;
        unit("degrade_failure_ratio", self.degrade_failure_ratio)?;
        unit("recover_failure_ratio", self.recover_failure_ratio)?;
        unit("min_char_score", self.min_char_score)?;

        if self.inference_timeout_ms == 0 {
            return Err(Error::Config("inference_timeout_ms must be > 0".into()));
        }
        if self.degrade_failure_window == 0 {
            return Err(Error::Config("degrade_failure_window must be > 0".into()));
        }
        if self.degrade_min_samples == 0 || self.degrade_min_samples > self.degrade_failure_window {
            return Err(Error::Config(format!(
                "degrade_min_samples must be within [1, {}], got {}",
                self.degrade_failure_window, self.degrade_min_samples
            )));
        }
        if self.degrade_consecutive_windows == 0 || self.recover_consecutive_windows == 0 {
            return Err(Error::Config(
                "consecutive window counts must be > 0".into(),
            ));
        }
        if self.recover_latency_threshold_ms > self.degrade_latency_threshold_ms {
            return Err(Error::Config(format!(
                "recover_latency_threshold_ms ({}) exceeds degrade_latency_threshold_ms ({})",
                self.recover_latency_threshold_ms, self.degrade_latency_threshold_ms
            )));
        }
        if self.recover_failure_ratio > self.degrade_failure_ratio {
            return Err(Error::Config(format!(
                "recover_failure_ratio ({}) exceeds degrade_failure_ratio ({})",
                self.recover_failure_ratio, self.degrade_failure_ratio
            )));
        }
        if self.degraded_sampling_multiplier.is_nan() || self.degraded_sampling_multiplier < 1.0 {
            return Err(Error::Config(
                "degraded_sampling_multiplier must be >= 1.0".into(),
            ));
        }
        if self.max_detections_per_frame == 0 {
            return Err(Error::Config("max_detections_per_frame must be > 0".into()));
        }
        Ok(())
    }

    /// Copy with a degradation delta layered on top
    pub fn with_delta(&self, delta: &ConfigDelta) -> PipelineConfig {
        let mut out = self.clone();
        if let Some(interval) = delta.sampling_interval_ms {
            out.sampling_interval_ms = interval;
        }
        if let Some(enabled) = delta.per_char_scoring {
            out.per_char_scoring = enabled;
        }
        out
    }
}
