//! Confidence Fusion
//!
//! Turns a raw engine score plus quality signals into a calibrated
//! confidence. Penalties are additive; the result is clamped to [0, 1]
//! before the `ConfidenceScore` is built, so only NaN input fails.

use lpr_common::model::{ConfidenceScore, QualityFlags};
use lpr_common::{Error, Result};

/// Penalty for a partially visible plate
pub const PARTIAL_PENALTY: f64 = 0.10;
/// Penalty for motion/focus blur
pub const BLUR_PENALTY: f64 = 0.08;
/// Penalty for low-light capture
pub const LOW_LIGHT_PENALTY: f64 = 0.05;

/// Quality signals that affect fused confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualitySignals {
    pub partial: bool,
    pub blurred: bool,
    pub low_light: bool,
}

impl From<QualityFlags> for QualitySignals {
    fn from(flags: QualityFlags) -> Self {
        Self {
            partial: flags.is_partial(),
            blurred: flags.is_blurred(),
            low_light: flags.is_low_light(),
        }
    }
}

/// Fuse a raw score with quality penalties
///
/// # Errors
/// `Error::OutOfRange` only when `raw_score` is NaN.
pub fn fuse_confidence(raw_score: f64, signals: QualitySignals) -> Result<ConfidenceScore> {
    if raw_score.is_nan() {
        return Err(Error::OutOfRange(raw_score));
    }

    let mut value = raw_score;
    if signals.partial {
        value -= PARTIAL_PENALTY;
    }
    if signals.blurred {
        value -= BLUR_PENALTY;
    }
    if signals.low_light {
        value -= LOW_LIGHT_PENALTY;
    }

    ConfidenceScore::new(value.clamp(0.0, 1.0))
}
