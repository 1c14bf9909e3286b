//! Pure recognition services
//!
//! Stateless (or small-buffer) building blocks composed by the pipeline:
//! - plate_normalizer: raw text → `NormalizedPlate`
//! - confidence_fusion: raw score + quality → `ConfidenceScore`
//! - dedup_window: repeated-sighting suppression
//! - upsert_planner: event → `UpsertPlan`
//! - frame_sampler: live frame throttling strategies

pub mod confidence_fusion;
pub mod dedup_window;
pub mod frame_sampler;
pub mod plate_normalizer;
pub mod upsert_planner;

pub use confidence_fusion::{fuse_confidence, QualitySignals};
pub use dedup_window::{DedupEntry, DedupOutcome, DedupWindow};
pub use frame_sampler::{
    should_sample, ActivityAdaptiveSampler, IntervalSampler, SamplingStrategy,
};
pub use plate_normalizer::normalize_plate;
pub use upsert_planner::build_plan;
