//! Raw engine output

use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top).max(0)
    }
}

bitflags::bitflags! {
    /// Image quality problems reported with a detection
    ///
    /// On the wire this is the raw bitmask; bits the engine sets that are
    /// not defined here are dropped on deserialize.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "u8", into = "u8")]
    pub struct QualityFlags: u8 {
        const BLUR = 1 << 0;
        const LOW_LIGHT = 1 << 1;
        const PARTIAL = 1 << 2;
        const GLARE = 1 << 3;
        const OCCLUSION = 1 << 4;
    }
}

impl QualityFlags {
    pub fn is_blurred(self) -> bool {
        self.contains(Self::BLUR)
    }

    pub fn is_low_light(self) -> bool {
        self.contains(Self::LOW_LIGHT)
    }

    pub fn is_partial(self) -> bool {
        self.contains(Self::PARTIAL)
    }
}

impl From<u8> for QualityFlags {
    fn from(bits: u8) -> Self {
        QualityFlags::from_bits_truncate(bits)
    }
}

impl From<QualityFlags> for u8 {
    fn from(flags: QualityFlags) -> u8 {
        flags.bits()
    }
}

/// One text/score detection returned by the inference engine for a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Unnormalized recognized text
    pub text: String,
    /// Engine score, nominally in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub bounding_box: BoundingBox,
    /// Engine-reported inference latency (ms)
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub quality: QualityFlags,
    /// Optional per-character scores, one per recognized character
    #[serde(default)]
    pub char_scores: Option<Vec<f64>>,
}

impl RawDetection {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
            bounding_box: BoundingBox::default(),
            latency_ms: 0,
            quality: QualityFlags::empty(),
            char_scores: None,
        }
    }

    pub fn with_quality(mut self, quality: QualityFlags) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_char_scores(mut self, scores: Vec<f64>) -> Self {
        self.char_scores = Some(scores);
        self
    }

    /// Lowest per-character score, if any were reported
    pub fn min_char_score(&self) -> Option<f64> {
        self.char_scores
            .as_ref()
            .and_then(|scores| scores.iter().copied().reduce(f64::min))
    }
}
