//! Validated value types: plate keys and confidence scores

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Shortest accepted plate key
pub const PLATE_MIN_LEN: usize = 2;
/// Longest accepted plate key
pub const PLATE_MAX_LEN: usize = 16;

/// Canonical plate key: `^[A-Z0-9-]{2,16}$`
///
/// Every instance satisfies the pattern; the only constructors validate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedPlate(String);

impl NormalizedPlate {
    /// Validate an already-canonical string
    ///
    /// No normalization is applied here; use the plate normalizer for raw text.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if Self::is_canonical(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidFormat(value))
        }
    }

    pub fn is_canonical(value: &str) -> bool {
        (PLATE_MIN_LEN..=PLATE_MAX_LEN).contains(&value.len())
            && value
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NormalizedPlate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NormalizedPlate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<NormalizedPlate> for String {
    fn from(plate: NormalizedPlate) -> String {
        plate.0
    }
}

impl AsRef<str> for NormalizedPlate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Confidence in [0, 1], never NaN
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ConfidenceScore(f64);

impl ConfidenceScore {
    pub const ZERO: ConfidenceScore = ConfidenceScore(0.0);
    pub const ONE: ConfidenceScore = ConfidenceScore(1.0);

    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || !(0.0..=1.0).contains(&value) {
            return Err(Error::OutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for ConfidenceScore {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ConfidenceScore> for f64 {
    fn from(score: ConfidenceScore) -> f64 {
        score.0
    }
}

impl std::fmt::Display for ConfidenceScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}
