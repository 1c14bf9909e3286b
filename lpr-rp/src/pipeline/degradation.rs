//! Degradation Controller
//!
//! Switches between `Normal` and `Degraded` operating modes from the
//! rolling window statistics, with hysteresis:
//! - Normal → Degraded: p95 above `degrade_latency_threshold_ms` for
//!   `degrade_consecutive_windows` consecutive evaluations, or the failure
//!   ratio above `degrade_failure_ratio` once the window holds at least
//!   `degrade_min_samples` attempts (immediate)
//! - Degraded → Normal: p95 below `recover_latency_threshold_ms` AND the
//!   failure ratio below `recover_failure_ratio` for
//!   `recover_consecutive_windows` consecutive evaluations
//!
//! A transition hands back a `ConfigDelta`; the controller never applies it.

use lpr_common::model::{ConfigDelta, OperatingMode};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::pipeline::metrics::WindowStats;

/// Thresholds and base settings the controller works from
#[derive(Debug, Clone, PartialEq)]
pub struct DegradationPolicy {
    pub degrade_latency_ms: u64,
    pub degrade_failure_ratio: f64,
    pub degrade_min_samples: usize,
    pub degrade_consecutive: u32,
    pub recover_latency_ms: u64,
    pub recover_failure_ratio: f64,
    pub recover_consecutive: u32,
    pub sampling_multiplier: f64,
    /// Undegraded sampling interval
    pub base_sampling_interval_ms: u64,
    /// Undegraded per-character scoring setting
    pub base_per_char_scoring: bool,
}

impl From<&PipelineConfig> for DegradationPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            degrade_latency_ms: config.degrade_latency_threshold_ms,
            degrade_failure_ratio: config.degrade_failure_ratio,
            degrade_min_samples: config.degrade_min_samples,
            degrade_consecutive: config.degrade_consecutive_windows,
            recover_latency_ms: config.recover_latency_threshold_ms,
            recover_failure_ratio: config.recover_failure_ratio,
            recover_consecutive: config.recover_consecutive_windows,
            sampling_multiplier: config.degraded_sampling_multiplier,
            base_sampling_interval_ms: config.sampling_interval_ms,
            base_per_char_scoring: config.per_char_scoring,
        }
    }
}

impl DegradationPolicy {
    /// Delta that moves the pipeline into `mode`
    pub fn delta_for(&self, mode: OperatingMode) -> ConfigDelta {
        match mode {
            OperatingMode::Degraded => ConfigDelta {
                sampling_interval_ms: Some(
                    (self.base_sampling_interval_ms as f64 * self.sampling_multiplier).round()
                        as u64,
                ),
                per_char_scoring: Some(false),
            },
            OperatingMode::Normal => ConfigDelta {
                sampling_interval_ms: Some(self.base_sampling_interval_ms),
                per_char_scoring: Some(self.base_per_char_scoring),
            },
        }
    }
}

/// Mode switch decided by one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeChange {
    pub mode: OperatingMode,
    pub delta: ConfigDelta,
}

/// Hysteresis state machine over rolling statistics
#[derive(Debug)]
pub struct DegradationController {
    policy: DegradationPolicy,
    mode: OperatingMode,
    slow_streak: u32,
    healthy_streak: u32,
}

impl DegradationController {
    pub fn new(policy: DegradationPolicy) -> Self {
        Self {
            policy,
            mode: OperatingMode::Normal,
            slow_streak: 0,
            healthy_streak: 0,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn policy(&self) -> &DegradationPolicy {
        &self.policy
    }

    /// Swap thresholds, keeping the current mode and streaks
    pub fn set_policy(&mut self, policy: DegradationPolicy) {
        self.policy = policy;
    }

    /// Delta currently in force (empty in Normal mode)
    pub fn active_delta(&self) -> ConfigDelta {
        match self.mode {
            OperatingMode::Normal => ConfigDelta::default(),
            OperatingMode::Degraded => self.policy.delta_for(OperatingMode::Degraded),
        }
    }

    /// Back to Normal with no history (pipeline restart)
    pub fn reset(&mut self) {
        self.mode = OperatingMode::Normal;
        self.slow_streak = 0;
        self.healthy_streak = 0;
    }

    /// Evaluate one window; returns the mode change, if any
    pub fn evaluate(&mut self, stats: &WindowStats) -> Option<ModeChange> {
        if stats.samples == 0 {
            return None;
        }

        match self.mode {
            OperatingMode::Normal => {
                if stats.p95_ms > self.policy.degrade_latency_ms {
                    self.slow_streak += 1;
                } else {
                    self.slow_streak = 0;
                }

                let failing = stats.samples >= self.policy.degrade_min_samples
                    && stats.failure_ratio > self.policy.degrade_failure_ratio;
                let slow = self.slow_streak >= self.policy.degrade_consecutive;
                debug!(
                    p95_ms = stats.p95_ms,
                    failure_ratio = stats.failure_ratio,
                    slow_streak = self.slow_streak,
                    "Degradation evaluation (normal)"
                );

                if failing || slow {
                    Some(self.switch_to(OperatingMode::Degraded))
                } else {
                    None
                }
            }
            OperatingMode::Degraded => {
                let healthy = stats.p95_ms < self.policy.recover_latency_ms
                    && stats.failure_ratio < self.policy.recover_failure_ratio;
                if healthy {
                    self.healthy_streak += 1;
                } else {
                    self.healthy_streak = 0;
                }
                debug!(
                    p95_ms = stats.p95_ms,
                    failure_ratio = stats.failure_ratio,
                    healthy_streak = self.healthy_streak,
                    "Degradation evaluation (degraded)"
                );

                if self.healthy_streak >= self.policy.recover_consecutive {
                    Some(self.switch_to(OperatingMode::Normal))
                } else {
                    None
                }
            }
        }
    }

    fn switch_to(&mut self, mode: OperatingMode) -> ModeChange {
        self.mode = mode;
        self.slow_streak = 0;
        self.healthy_streak = 0;
        ModeChange {
            mode,
            delta: self.policy.delta_for(mode),
        }
    }
}
