//! # LPR Recognition Pipeline Library (lpr-rp)
//!
//! Turns camera frames into deduplicated plate sightings and persistence plans.
//!
//! **Purpose:** Sample frames, run them through an external inference engine
//! one at a time, normalize and score the detections, collapse repeats, and
//! emit `(RecognitionEvent, UpsertPlan)` pairs for the persistence side.
//!
//! **Architecture:** Pure services (normalizer, fusion, dedup, planner,
//! sampler) driven by a single-owner control task (scheduler, degradation
//! controller, lifecycle); collaborators plug in through the
//! `InferenceEngine` and `AggregateLookup` traits.

pub mod aggregates;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod scenario;
pub mod services;

pub use aggregates::{AggregateLookup, InMemoryAggregates, NoAggregates};
pub use config::{DedupPolicy, PipelineConfig, TomlConfig};
pub use error::{Error, Result};
pub use pipeline::{
    FrameDisposition, PipelineHandle, PipelineOutputs, RecognitionOutput, RecognitionPipeline,
};
