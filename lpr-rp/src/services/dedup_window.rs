//! Dedup Window
//!
//! Suppresses repeated sightings of the same plate within a time horizon.
//! An incoming event is suppressed when a retained entry for the same plate
//! lies within the window of it (inclusive, absolute difference, so
//! out-of-order timestamps match in both directions).
//!
//! Entries are pruned lazily: `prune` must run after every batch so the
//! buffer stays bounded by the number of distinct plates per window.

use std::collections::VecDeque;

use lpr_common::model::{ConfidenceScore, NormalizedPlate, RecognitionEvent};

use crate::config::DedupPolicy;

/// Retained sighting
#[derive(Debug, Clone, PartialEq)]
pub struct DedupEntry {
    pub plate: NormalizedPlate,
    pub captured_at_ms: i64,
    pub confidence: ConfidenceScore,
}

/// Result of one `accept_or_suppress` pass, both lists in input order
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub accepted: Vec<RecognitionEvent>,
    pub suppressed: Vec<RecognitionEvent>,
}

/// Recent accepted sightings
#[derive(Debug, Default)]
pub struct DedupWindow {
    entries: VecDeque<DedupEntry>,
    policy: DedupPolicy,
}

impl DedupWindow {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            entries: VecDeque::new(),
            policy,
        }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: DedupPolicy) {
        self.policy = policy;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DedupEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Split `incoming` into accepted and suppressed events
    ///
    /// Accepted events are inserted immediately, so a later event in the same
    /// batch is checked against earlier ones.
    pub fn accept_or_suppress(
        &mut self,
        incoming: Vec<RecognitionEvent>,
        window_ms: u64,
    ) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();

        for event in incoming {
            let conflicting = self.conflicting_entry(&event, window_ms);

            let accept = match (conflicting, self.policy) {
                (None, _) => true,
                (Some(_), DedupPolicy::KeepFirst) => false,
                (Some(best), DedupPolicy::KeepMaxConfidence) => event.confidence > best,
            };

            if !accept {
                outcome.suppressed.push(event);
                continue;
            }

            if conflicting.is_some() {
                // KeepMaxConfidence: the newcomer takes over the plate's slot
                let window = window_ms as i128;
                self.entries.retain(|e| {
                    !(e.plate == event.plate
                        && within(e.captured_at_ms, event.captured_at_ms, window))
                });
            }

            self.entries.push_back(DedupEntry {
                plate: event.plate.clone(),
                captured_at_ms: event.captured_at_ms,
                confidence: event.confidence,
            });
            outcome.accepted.push(event);
        }

        outcome
    }

    /// Drop entries strictly older than the window, returning how many went
    pub fn prune(&mut self, now_ms: i64, window_ms: u64) -> usize {
        let before = self.entries.len();
        let window = window_ms as i128;
        self.entries
            .retain(|e| (now_ms as i128) - (e.captured_at_ms as i128) <= window);
        before - self.entries.len()
    }

    /// Highest confidence among same-plate entries inside the window
    fn conflicting_entry(
        &self,
        event: &RecognitionEvent,
        window_ms: u64,
    ) -> Option<ConfidenceScore> {
        let window = window_ms as i128;
        self.entries
            .iter()
            .filter(|e| e.plate == event.plate && within(e.captured_at_ms, event.captured_at_ms, window))
            .map(|e| e.confidence)
            .reduce(|a, b| if b > a { b } else { a })
    }
}

fn within(a_ms: i64, b_ms: i64, window: i128) -> bool {
    ((a_ms as i128) - (b_ms as i128)).abs() <= window
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(plate: &str, ts: i64, confidence: f64) -> RecognitionEvent {
        RecognitionEvent {
            event_id: Uuid::new_v4(),
            plate_id: None,
            plate: NormalizedPlate::new(plate).unwrap(),
            confidence: ConfidenceScore::new(confidence).unwrap(),
            captured_at_ms: ts,
            frame_id: format!("frame-{}", ts),
            location: None,
            raw_text: plate.to_string(),
            bounding_box: Default::default(),
        }
    }

    #[test]
    fn test_repeat_inside_window_suppressed() {
        let mut window = DedupWindow::new(DedupPolicy::KeepFirst);
        let first = window.accept_or_suppress(vec![event("ABC123", 1000, 0.9)], 3000);
        assert_eq!(first.accepted.len(), 1);

        let second = window.accept_or_suppress(vec![event("ABC123", 1200, 0.9)], 3000);
        assert!(second.accepted.is_empty());
        assert_eq!(second.suppressed.len(), 1);
    }

    #[test]
    fn test_repeat_outside_window_accepted() {
        let mut window = DedupWindow::new(DedupPolicy::KeepFirst);
        window.accept_or_suppress(vec![event("ABC123", 1000, 0.9)], 3000);
        let later = window.accept_or_suppress(vec![event("ABC123", 5000, 0.9)], 3000);
        assert_eq!(later.accepted.len(), 1);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let mut window = DedupWindow::new(DedupPolicy::KeepFirst);
        window.accept_or_suppress(vec![event("ABC123", 1000, 0.9)], 3000);
        let edge = window.accept_or_suppress(vec![event("ABC123", 4000, 0.9)], 3000);
        assert_eq!(edge.suppressed.len(), 1);
        let past = window.accept_or_suppress(vec![event("ABC123", 4001, 0.9)], 3000);
        assert_eq!(past.accepted.len(), 1);
    }

    #[test]
    fn test_difference_is_symmetric() {
        let mut window = DedupWindow::new(DedupPolicy::KeepFirst);
        window.accept_or_suppress(vec![event("ABC123", 10_000, 0.9)], 3000);
        // Older timestamp still within 3s of the retained entry
        let earlier = window.accept_or_suppress(vec![event("ABC123", 8_000, 0.9)], 3000);
        assert_eq!(earlier.suppressed.len(), 1);
    }

    #[test]
    fn test_different_plates_do_not_interact() {
        let mut window = DedupWindow::new(DedupPolicy::KeepFirst);
        let out = window.accept_or_suppress(
            vec![event("ABC123", 1000, 0.9), event("XYZ789", 1000, 0.9)],
            3000,
        );
        assert_eq!(out.accepted.len(), 2);
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let mut window = DedupWindow::new(DedupPolicy::KeepFirst);
        let out = window.accept_or_suppress(
            vec![
                event("ABC123", 1000, 0.7),
                event("ABC123", 1000, 0.95),
                event("XYZ789", 1000, 0.9),
            ],
            3000,
        );
        assert_eq!(out.accepted.len(), 2);
        assert_eq!(out.accepted[0].confidence.value(), 0.7);
        assert_eq!(out.suppressed.len(), 1);
    }

    #[test]
    fn test_keep_max_confidence_replaces_weaker_entry() {
        let mut window = DedupWindow::new(DedupPolicy::KeepMaxConfidence);
        window.accept_or_suppress(vec![event("ABC123", 1000, 0.7)], 3000);

        let weaker = window.accept_or_suppress(vec![event("ABC123", 1100, 0.7)], 3000);
        assert_eq!(weaker.suppressed.len(), 1, "equal confidence must not replace");

        let stronger = window.accept_or_suppress(vec![event("ABC123", 1200, 0.9)], 3000);
        assert_eq!(stronger.accepted.len(), 1);
        assert_eq!(window.len(), 1);
        let kept = window.entries().next().unwrap();
        assert_eq!(kept.captured_at_ms, 1200);
        assert_eq!(kept.confidence.value(), 0.9);
    }

    #[test]
    fn test_prune_removes_only_strictly_older_entries() {
        let mut window = DedupWindow::new(DedupPolicy::KeepFirst);
        window.accept_or_suppress(
            vec![
                event("AAA1", 1000, 0.9),
                event("BBB2", 2000, 0.9),
                event("CCC3", 3000, 0.9),
            ],
            3000,
        );

        // now - 1000 = 3000 (kept, inclusive), now - 2000 = 2000 (kept)
        assert_eq!(window.prune(4000, 3000), 0);
        assert_eq!(window.prune(4001, 3000), 1);
        assert_eq!(window.len(), 2);
        assert_eq!(window.prune(10_000, 3000), 2);
        assert!(window.is_empty());
    }

    #[test]
    fn test_memory_bounded_by_distinct_plates_per_window() {
        let mut window = DedupWindow::new(DedupPolicy::KeepFirst);
        // One sighting of the same plate every 100ms for a minute
        for i in 0..600 {
            let ts = i * 100;
            window.accept_or_suppress(vec![event("ABC123", ts, 0.9)], 3000);
            window.prune(ts, 3000);
        }
        assert!(window.len() <= 2, "window grew to {}", window.len());
    }
}
