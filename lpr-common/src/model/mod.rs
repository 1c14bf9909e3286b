//! Shared data model for the recognition pipeline

mod detection;
mod frame;
mod pipeline_types;
mod plate;
mod recognition;

pub use detection::{BoundingBox, QualityFlags, RawDetection};
pub use frame::{Frame, GeoPoint, PixelFormat};
pub use pipeline_types::{
    ConfigDelta, FailureKind, LatencyPercentiles, OperatingMode, PipelineMetricsSnapshot,
    PipelineState, SkipCounters, SkipReason,
};
pub use plate::{ConfidenceScore, NormalizedPlate, PLATE_MAX_LEN, PLATE_MIN_LEN};
pub use recognition::{PlateAggregate, RecognitionEvent, UpsertPlan};
