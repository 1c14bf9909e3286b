//! Plate Normalizer
//!
//! Canonicalizes raw engine text into a validated plate key:
//! 1. Trim and uppercase
//! 2. Collapse runs of whitespace/underscores into a single dash
//! 3. Strip anything outside `[A-Z0-9-]`
//! 4. Collapse repeated dashes, strip leading/trailing dashes
//! 5. Validate against `^[A-Z0-9-]{2,16}$`
//!
//! No look-alike substitution (O/0, I/1) happens here. Normalization is
//! idempotent.

use lpr_common::model::NormalizedPlate;
use lpr_common::{Error, Result};

/// Normalize raw recognized text
///
/// `region_hint` is accepted for region-specific rules and currently unused.
///
/// # Errors
/// `Error::InvalidFormat(raw)` when nothing plate-like survives. Callers drop
/// the detection; this is never fatal.
pub fn normalize_plate(raw: &str, region_hint: Option<&str>) -> Result<NormalizedPlate> {
    let _ = region_hint;

    let upper = raw.trim().to_uppercase();

    let mut out = String::with_capacity(upper.len());
    let mut in_separator_run = false;
    for c in upper.chars() {
        if c.is_whitespace() || c == '_' {
            if !in_separator_run {
                out.push('-');
                in_separator_run = true;
            }
            continue;
        }
        in_separator_run = false;
        if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' {
            out.push(c);
        }
    }

    let collapsed = collapse_dashes(&out);
    let trimmed = collapsed.trim_matches('-');

    NormalizedPlate::new(trimmed).map_err(|_| Error::InvalidFormat(raw.to_string()))
}

fn collapse_dashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_dash = false;
    for c in s.chars() {
        if c == '-' {
            if !prev_dash {
                out.push(c);
            }
            prev_dash = true;
        } else {
            out.push(c);
            prev_dash = false;
        }
    }
    out
}
