//! # LPR Common Library
//!
//! Shared code for the licence plate recognition crates including:
//! - Data model (frames, detections, plates, events, upsert plans)
//! - Event types (LprEvent enum) and the EventBus
//! - Configuration file resolution
//! - Clock and identity injection points

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
