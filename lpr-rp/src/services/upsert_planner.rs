//! Upsert Plan Builder
//!
//! Decides whether an accepted event creates a new plate aggregate or
//! updates an existing one. The caller supplies the existing aggregate (the
//! planner never looks anything up) and the identity provider (the planner
//! never mints ids on its own). Total: never fails, never performs I/O.

use lpr_common::model::{PlateAggregate, RecognitionEvent, UpsertPlan};
use lpr_common::uuid_utils::IdentityProvider;

/// Build the persistence plan for one accepted event
///
/// The event inside the plan is bound to the aggregate id.
pub fn build_plan(
    existing: Option<&PlateAggregate>,
    event: &RecognitionEvent,
    ids: &dyn IdentityProvider,
) -> UpsertPlan {
    match existing {
        None => {
            let id = ids.next_id();
            let aggregate =
                PlateAggregate::first_sighting(id, event.plate.clone(), event.captured_at_ms);
            UpsertPlan::InsertNewAggregateAndEvent {
                aggregate,
                event: event.bound_to(id),
            }
        }
        Some(current) => {
            let aggregate = current.with_sighting(event.captured_at_ms);
            UpsertPlan::InsertEventAndUpdateAggregate {
                event: event.bound_to(aggregate.id()),
                aggregate,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lpr_common::model::{ConfidenceScore, NormalizedPlate};
    use lpr_common::uuid_utils::SequentialIds;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn event(plate: &str, ts: i64) -> RecognitionEvent {
        RecognitionEvent {
            event_id: Uuid::from_u128(999),
            plate_id: None,
            plate: NormalizedPlate::new(plate).unwrap(),
            confidence: ConfidenceScore::new(0.9).unwrap(),
            captured_at_ms: ts,
            frame_id: "f".to_string(),
            location: None,
            raw_text: plate.to_lowercase(),
            bounding_box: Default::default(),
        }
    }

    #[test]
    fn test_new_plate_creates_aggregate() {
        let ids = SequentialIds::new();
        let plan = build_plan(None, &event("ABC123", 5_000), &ids);

        match plan {
            UpsertPlan::InsertNewAggregateAndEvent { aggregate, event } => {
                assert_eq!(aggregate.id(), Uuid::from_u128(1));
                assert_eq!(aggregate.plate().as_str(), "ABC123");
                assert_eq!(aggregate.first_seen_ms(), 5_000);
                assert_eq!(aggregate.last_seen_ms(), 5_000);
                assert_eq!(aggregate.total_recognitions(), 1);
                assert_eq!(event.plate_id, Some(aggregate.id()));
            }
            other => panic!("expected new aggregate plan, got {:?}", other),
        }
    }

    #[test]
    fn test_new_ids_are_fresh_within_a_run() {
        let ids = SequentialIds::new();
        let mut seen = HashSet::new();
        for i in 0..50 {
            let plan = build_plan(None, &event("ABC123", i), &ids);
            assert!(plan.is_new_aggregate());
            assert!(seen.insert(plan.aggregate().id()), "id reused");
        }
    }

    #[test]
    fn test_existing_plate_updates_aggregate() {
        let ids = SequentialIds::new();
        let existing = PlateAggregate::new(
            Uuid::from_u128(42),
            NormalizedPlate::new("ABC123").unwrap(),
            1_000,
            2_000,
            4,
        )
        .unwrap();

        let plan = build_plan(Some(&existing), &event("ABC123", 9_000), &ids);
        match plan {
            UpsertPlan::InsertEventAndUpdateAggregate { aggregate, event } => {
                assert_eq!(aggregate.id(), Uuid::from_u128(42));
                assert_eq!(aggregate.first_seen_ms(), 1_000);
                assert_eq!(aggregate.last_seen_ms(), 9_000);
                assert_eq!(aggregate.total_recognitions(), 5);
                assert_eq!(event.plate_id, Some(Uuid::from_u128(42)));
            }
            other => panic!("expected update plan, got {:?}", other),
        }
        // No identity consumed for updates
        assert_eq!(ids.next_id(), Uuid::from_u128(1));
    }

    #[test]
    fn test_last_seen_never_moves_backwards() {
        let ids = SequentialIds::new();
        let existing = PlateAggregate::new(
            Uuid::from_u128(7),
            NormalizedPlate::new("ABC123").unwrap(),
            1_000,
            8_000,
            2,
        )
        .unwrap();

        let plan = build_plan(Some(&existing), &event("ABC123", 3_000), &ids);
        assert_eq!(plan.aggregate().last_seen_ms(), 8_000);
        assert_eq!(plan.aggregate().total_recognitions(), 3);
        assert_eq!(plan.event().captured_at_ms, 3_000);
    }
}
