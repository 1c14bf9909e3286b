//! Recognition stage
//!
//! Turns one engine result into recognition outputs. Detections are handled
//! in engine order:
//! 1. normalize text (skip `InvalidFormat`)
//! 2. fuse confidence (skip `OutOfRange`)
//! 3. minimum fused confidence gate (skip `LowConfidence`)
//! 4. optional per-character gate (skip `LowCharConfidence`)
//! 5. dedup window, then prune against the frame's capture time
//! 6. upsert plan per accepted event
//!
//! Pure-function failures never abort the batch.

use std::collections::HashMap;

use lpr_common::model::{
    Frame, NormalizedPlate, PlateAggregate, RawDetection, RecognitionEvent, SkipReason,
    UpsertPlan,
};
use lpr_common::uuid_utils::IdentityProvider;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregates::AggregateLookup;
use crate::config::{DedupPolicy, PipelineConfig};
use crate::services::{build_plan, fuse_confidence, normalize_plate, DedupWindow, QualitySignals};

/// One accepted sighting and the plan that persists it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOutput {
    /// Event bound to its aggregate id
    pub event: RecognitionEvent,
    pub plan: UpsertPlan,
}

/// Everything one batch produced
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outputs: Vec<RecognitionOutput>,
    pub suppressed: Vec<RecognitionEvent>,
    pub skips: Vec<SkipReason>,
}

/// Per-detection processing plus the dedup window it owns
#[derive(Debug)]
pub struct RecognitionStage {
    dedup: DedupWindow,
    /// Aggregates planned while their plate is still inside the dedup window;
    /// covers plans the persistence side has not applied yet
    recent_plans: HashMap<NormalizedPlate, PlateAggregate>,
}

impl RecognitionStage {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            dedup: DedupWindow::new(policy),
            recent_plans: HashMap::new(),
        }
    }

    pub fn set_policy(&mut self, policy: DedupPolicy) {
        self.dedup.set_policy(policy);
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    /// Process one engine result for `frame`
    pub fn process(
        &mut self,
        frame: &Frame,
        detections: Vec<RawDetection>,
        config: &PipelineConfig,
        aggregates: &dyn AggregateLookup,
        ids: &dyn IdentityProvider,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut candidates = Vec::with_capacity(detections.len());

        for detection in detections {
            match admit_detection(frame, &detection, config, ids) {
                Ok(event) => candidates.push(event),
                Err(reason) => {
                    debug!(
                        "Skipping detection {:?} in frame {}: {:?}",
                        detection.text, frame.id, reason
                    );
                    report.skips.push(reason);
                }
            }
        }

        let outcome = self
            .dedup
            .accept_or_suppress(candidates, config.dedupe_window_ms);
        self.dedup.prune(frame.captured_at_ms, config.dedupe_window_ms);

        for event in outcome.accepted {
            let existing = self.existing_aggregate(&event.plate, aggregates);
            let plan = build_plan(existing.as_ref(), &event, ids);
            self.recent_plans
                .insert(event.plate.clone(), plan.aggregate().clone());
            report.outputs.push(RecognitionOutput {
                event: plan.event().clone(),
                plan,
            });
        }
        report.suppressed = outcome.suppressed;

        let dedup = &self.dedup;
        self.recent_plans
            .retain(|plate, _| dedup.entries().any(|e| &e.plate == plate));

        report
    }

    /// Newest known aggregate: the collaborator's copy or our own unapplied plan
    fn existing_aggregate(
        &self,
        plate: &NormalizedPlate,
        aggregates: &dyn AggregateLookup,
    ) -> Option<PlateAggregate> {
        let stored = aggregates.find(plate);
        let planned = self.recent_plans.get(plate).cloned();
        match (stored, planned) {
            (Some(stored), Some(planned)) => {
                if planned.total_recognitions() > stored.total_recognitions() {
                    Some(planned)
                } else {
                    Some(stored)
                }
            }
            (stored, planned) => stored.or(planned),
        }
    }
}

/// Validate one detection into an unbound event, or say why it was skipped
pub fn admit_detection(
    frame: &Frame,
    detection: &RawDetection,
    config: &PipelineConfig,
    ids: &dyn IdentityProvider,
) -> Result<RecognitionEvent, SkipReason> {
    let plate = normalize_plate(&detection.text, config.region_hint.as_deref())
        .map_err(|_| SkipReason::InvalidFormat)?;

    let confidence = fuse_confidence(detection.confidence, QualitySignals::from(detection.quality))
        .map_err(|_| SkipReason::OutOfRange)?;

    if confidence.value() < config.min_fused_confidence {
        return Err(SkipReason::LowConfidence);
    }

    if config.per_char_scoring {
        if let Some(min_char) = detection.min_char_score() {
            if min_char.is_nan() || min_char < config.min_char_score {
                return Err(SkipReason::LowCharConfidence);
            }
        }
    }

    Ok(RecognitionEvent {
        event_id: ids.next_id(),
        plate_id: None,
        plate,
        confidence,
        captured_at_ms: frame.captured_at_ms,
        frame_id: frame.id.clone(),
        location: frame.location,
        raw_text: detection.text.clone(),
        bounding_box: detection.bounding_box,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::{InMemoryAggregates, NoAggregates};
    use lpr_common::model::{GeoPoint, PixelFormat, QualityFlags};
    use lpr_common::uuid_utils::SequentialIds;

    fn frame(id: &str, ts: i64) -> Frame {
        Frame::new(id, ts, 640, 480, PixelFormat::Yuv420)
    }

    #[test]
    fn test_skips_are_recorded_and_batch_continues() {
        let mut stage = RecognitionStage::new(DedupPolicy::KeepFirst);
        let config = PipelineConfig::default();
        let ids = SequentialIds::new();

        let report = stage.process(
            &frame("f1", 1_000),
            vec![
                RawDetection::new("@@@", 0.9),
                RawDetection::new("AB 123", f64::NAN),
                RawDetection::new("LOW1", 0.5),
                RawDetection::new("CH4R", 0.9).with_char_scores(vec![0.9, 0.1, 0.9, 0.9]),
                RawDetection::new("  ok 77 ", 0.9),
            ],
            &config,
            &NoAggregates,
            &ids,
        );

        assert_eq!(
            report.skips,
            vec![
                SkipReason::InvalidFormat,
                SkipReason::OutOfRange,
                SkipReason::LowConfidence,
                SkipReason::LowCharConfidence,
            ]
        );
        assert_eq!(report.outputs.len(), 1);
        assert_eq!(report.outputs[0].event.plate.as_str(), "OK-77");
    }

    #[test]
    fn test_char_gate_disabled_lets_weak_chars_through() {
        let mut stage = RecognitionStage::new(DedupPolicy::KeepFirst);
        let config = PipelineConfig {
            per_char_scoring: false,
            ..Default::default()
        };
        let report = stage.process(
            &frame("f1", 0),
            vec![RawDetection::new("CH4R", 0.9).with_char_scores(vec![0.1])],
            &config,
            &NoAggregates,
            &SequentialIds::new(),
        );
        assert_eq!(report.outputs.len(), 1);
    }

    #[test]
    fn test_quality_penalties_can_drop_below_minimum() {
        let mut stage = RecognitionStage::new(DedupPolicy::KeepFirst);
        let config = PipelineConfig::default();
        let flags = QualityFlags::PARTIAL | QualityFlags::BLUR | QualityFlags::LOW_LIGHT;
        let report = stage.process(
            &frame("f1", 0),
            vec![RawDetection::new("ABC123", 0.78).with_quality(flags)],
            &config,
            &NoAggregates,
            &SequentialIds::new(),
        );
        // 0.78 - 0.23 = 0.55 < 0.60
        assert_eq!(report.skips, vec![SkipReason::LowConfidence]);
    }

    #[test]
    fn test_event_carries_frame_context() {
        let mut stage = RecognitionStage::new(DedupPolicy::KeepFirst);
        let location = GeoPoint {
            latitude: 52.37,
            longitude: 4.89,
            accuracy_m: Some(5.0),
        };
        let report = stage.process(
            &frame("cam-7", 42_000).with_location(location),
            vec![RawDetection::new("xy-99", 0.95)],
            &PipelineConfig::default(),
            &NoAggregates,
            &SequentialIds::new(),
        );

        let output = &report.outputs[0];
        assert_eq!(output.event.frame_id, "cam-7");
        assert_eq!(output.event.captured_at_ms, 42_000);
        assert_eq!(output.event.location, Some(location));
        assert_eq!(output.event.raw_text, "xy-99");
        assert_eq!(output.event.plate_id, Some(output.plan.aggregate().id()));
        assert_eq!(&output.event, output.plan.event());
    }

    #[test]
    fn test_dedup_across_batches() {
        let mut stage = RecognitionStage::new(DedupPolicy::KeepFirst);
        let config = PipelineConfig::default();
        let ids = SequentialIds::new();

        let first = stage.process(
            &frame("f1", 1_000),
            vec![RawDetection::new("ABC123", 0.9)],
            &config,
            &NoAggregates,
            &ids,
        );
        let second = stage.process(
            &frame("f2", 1_200),
            vec![RawDetection::new("abc 123", 0.9)],
            &config,
            &NoAggregates,
            &ids,
        );
        assert_eq!(first.outputs.len(), 1);
        assert!(second.outputs.is_empty());
        assert_eq!(second.suppressed.len(), 1);
    }

    #[test]
    fn test_unapplied_plan_is_reused_for_replacement() {
        let mut stage = RecognitionStage::new(DedupPolicy::KeepMaxConfidence);
        let config = PipelineConfig::default();
        let ids = SequentialIds::new();
        let store = InMemoryAggregates::new();

        let weak = stage.process(
            &frame("f1", 1_000),
            vec![RawDetection::new("ABC123", 0.7)],
            &config,
            &store,
            &ids,
        );
        // Persistence has not applied the first plan yet
        let strong = stage.process(
            &frame("f2", 1_500),
            vec![RawDetection::new("ABC123", 0.95)],
            &config,
            &store,
            &ids,
        );

        let first_id = weak.outputs[0].plan.aggregate().id();
        let plan = &strong.outputs[0].plan;
        assert!(!plan.is_new_aggregate());
        assert_eq!(plan.aggregate().id(), first_id);
        assert_eq!(plan.aggregate().total_recognitions(), 2);
    }

    #[test]
    fn test_stored_aggregate_is_updated() {
        let mut stage = RecognitionStage::new(DedupPolicy::KeepFirst);
        let config = PipelineConfig::default();
        let ids = SequentialIds::new();
        let store = InMemoryAggregates::new();

        let first = stage.process(
            &frame("f1", 1_000),
            vec![RawDetection::new("ABC123", 0.9)],
            &config,
            &store,
            &ids,
        );
        store.apply(&first.outputs[0].plan);

        let later = stage.process(
            &frame("f2", 60_000),
            vec![RawDetection::new("ABC123", 0.9)],
            &config,
            &store,
            &ids,
        );
        let plan = &later.outputs[0].plan;
        assert!(!plan.is_new_aggregate());
        assert_eq!(plan.aggregate().first_seen_ms(), 1_000);
        assert_eq!(plan.aggregate().last_seen_ms(), 60_000);
    }

    #[test]
    fn test_recent_plans_follow_dedup_window() {
        let mut stage = RecognitionStage::new(DedupPolicy::KeepFirst);
        let config = PipelineConfig::default();
        let ids = SequentialIds::new();

        stage.process(
            &frame("f1", 1_000),
            vec![RawDetection::new("ABC123", 0.9)],
            &config,
            &NoAggregates,
            &ids,
        );
        assert_eq!(stage.recent_plans.len(), 1);

        stage.process(&frame("f2", 10_000), Vec::new(), &config, &NoAggregates, &ids);
        assert!(stage.dedup().is_empty());
        assert!(stage.recent_plans.is_empty());
    }
}
