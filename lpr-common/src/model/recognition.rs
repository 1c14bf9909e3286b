//! Recognition events, plate aggregates and persistence plans

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BoundingBox, ConfidenceScore, GeoPoint, NormalizedPlate};
use crate::{Error, Result};

/// One accepted plate sighting
///
/// Built by the recognition stage. `plate_id` is a placeholder (`None`) until
/// the upsert planner binds the event to an aggregate; events leaving the
/// pipeline always carry the bound id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub event_id: Uuid,
    pub plate_id: Option<Uuid>,
    pub plate: NormalizedPlate,
    pub confidence: ConfidenceScore,
    /// Capture timestamp of the source frame (epoch ms)
    pub captured_at_ms: i64,
    /// Correlation id of the source frame
    pub frame_id: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// Engine text before normalization
    pub raw_text: String,
    #[serde(default)]
    pub bounding_box: BoundingBox,
}

impl RecognitionEvent {
    /// Copy of this event bound to a plate aggregate
    pub fn bound_to(&self, plate_id: Uuid) -> Self {
        Self {
            plate_id: Some(plate_id),
            ..self.clone()
        }
    }
}

/// Everything known about one plate across sightings
///
/// Invariants: `first_seen_ms <= last_seen_ms` and `total_recognitions > 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AggregateRecord", into = "AggregateRecord")]
pub struct PlateAggregate {
    id: Uuid,
    plate: NormalizedPlate,
    first_seen_ms: i64,
    last_seen_ms: i64,
    total_recognitions: u64,
}

impl PlateAggregate {
    /// Rebuild an aggregate (e.g. from storage), checking its invariants
    pub fn new(
        id: Uuid,
        plate: NormalizedPlate,
        first_seen_ms: i64,
        last_seen_ms: i64,
        total_recognitions: u64,
    ) -> Result<Self> {
        if first_seen_ms > last_seen_ms {
            return Err(Error::InvalidInput(format!(
                "aggregate {} first seen ({}) after last seen ({})",
                id, first_seen_ms, last_seen_ms
            )));
        }
        if total_recognitions == 0 {
            return Err(Error::InvalidInput(format!(
                "aggregate {} has zero recognitions",
                id
            )));
        }
        Ok(Self {
            id,
            plate,
            first_seen_ms,
            last_seen_ms,
            total_recognitions,
        })
    }

    /// Aggregate for a plate seen for the first time
    pub fn first_sighting(id: Uuid, plate: NormalizedPlate, seen_at_ms: i64) -> Self {
        Self {
            id,
            plate,
            first_seen_ms: seen_at_ms,
            last_seen_ms: seen_at_ms,
            total_recognitions: 1,
        }
    }

    /// Copy updated with one more sighting
    ///
    /// `last_seen_ms` never moves backwards; out-of-order sightings still count.
    pub fn with_sighting(&self, seen_at_ms: i64) -> Self {
        Self {
            last_seen_ms: self.last_seen_ms.max(seen_at_ms),
            total_recognitions: self.total_recognitions.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn plate(&self) -> &NormalizedPlate {
        &self.plate
    }

    pub fn first_seen_ms(&self) -> i64 {
        self.first_seen_ms
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms
    }

    pub fn total_recognitions(&self) -> u64 {
        self.total_recognitions
    }
}

#[derive(Serialize, Deserialize)]
struct AggregateRecord {
    id: Uuid,
    plate: NormalizedPlate,
    first_seen_ms: i64,
    last_seen_ms: i64,
    total_recognitions: u64,
}

impl TryFrom<AggregateRecord> for PlateAggregate {
    type Error = Error;

    fn try_from(r: AggregateRecord) -> Result<Self> {
        PlateAggregate::new(
            r.id,
            r.plate,
            r.first_seen_ms,
            r.last_seen_ms,
            r.total_recognitions,
        )
    }
}

impl From<PlateAggregate> for AggregateRecord {
    fn from(a: PlateAggregate) -> Self {
        AggregateRecord {
            id: a.id,
            plate: a.plate,
            first_seen_ms: a.first_seen_ms,
            last_seen_ms: a.last_seen_ms,
            total_recognitions: a.total_recognitions,
        }
    }
}

/// Persistence mutation required for one accepted event
///
/// Pure data, applied exactly once by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpsertPlan {
    /// Plate never seen before: insert the fresh aggregate and the event
    InsertNewAggregateAndEvent {
        aggregate: PlateAggregate,
        event: RecognitionEvent,
    },
    /// Plate already known: insert the event, replace the aggregate
    InsertEventAndUpdateAggregate {
        aggregate: PlateAggregate,
        event: RecognitionEvent,
    },
}

impl UpsertPlan {
    pub fn aggregate(&self) -> &PlateAggregate {
        match self {
            UpsertPlan::InsertNewAggregateAndEvent { aggregate, .. }
            | UpsertPlan::InsertEventAndUpdateAggregate { aggregate, .. } => aggregate,
        }
    }

    pub fn event(&self) -> &RecognitionEvent {
        match self {
            UpsertPlan::InsertNewAggregateAndEvent { event, .. }
            | UpsertPlan::InsertEventAndUpdateAggregate { event, .. } => event,
        }
    }

    pub fn is_new_aggregate(&self) -> bool {
        matches!(self, UpsertPlan::InsertNewAggregateAndEvent { .. })
    }
}
