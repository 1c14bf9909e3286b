//! Frame Sampler
//!
//! Throttles which live frames are worth sending to inference. The cursor
//! (`last_processed_ms`) moves when a frame is admitted, before dispatch, so
//! a burst arriving while inference is busy cannot all slip through once the
//! gate reopens.

/// True iff at least `min_interval_ms` has passed since the last processed frame
pub fn should_sample(now_ms: i64, last_processed_ms: Option<i64>, min_interval_ms: u64) -> bool {
    match last_processed_ms {
        None => true,
        Some(last) => (now_ms as i128) - (last as i128) >= min_interval_ms as i128,
    }
}

/// Pluggable sampling policy
pub trait SamplingStrategy: Send {
    fn name(&self) -> &'static str;

    /// Decide on a frame arriving at `now_ms`; advances the cursor on admit
    fn admit(&mut self, now_ms: i64, min_interval_ms: u64) -> bool;

    /// Feedback after an inference completes with `detections` results
    fn observe(&mut self, _detections: usize) {}

    /// Forget all history (pipeline restart)
    fn reset(&mut self);
}

/// Fixed minimum interval
#[derive(Debug, Default)]
pub struct IntervalSampler {
    last_processed_ms: Option<i64>,
}

impl IntervalSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_processed_ms(&self) -> Option<i64> {
        self.last_processed_ms
    }
}

impl SamplingStrategy for IntervalSampler {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn admit(&mut self, now_ms: i64, min_interval_ms: u64) -> bool {
        if should_sample(now_ms, self.last_processed_ms, min_interval_ms) {
            self.last_processed_ms = Some(now_ms);
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.last_processed_ms = None;
    }
}

/// Interval that stretches while the scene is empty
///
/// Each inference without detections doubles the effective interval, up to
/// `max_backoff` times the configured one. Any detection snaps it back.
#[derive(Debug)]
pub struct ActivityAdaptiveSampler {
    last_processed_ms: Option<i64>,
    backoff: u32,
    max_backoff: u32,
}

impl ActivityAdaptiveSampler {
    pub fn new(max_backoff: u32) -> Self {
        Self {
            last_processed_ms: None,
            backoff: 1,
            max_backoff: max_backoff.max(1),
        }
    }

    /// Current multiplier applied to the configured interval
    pub fn backoff(&self) -> u32 {
        self.backoff
    }
}

impl SamplingStrategy for ActivityAdaptiveSampler {
    fn name(&self) -> &'static str {
        "activity_adaptive"
    }

    fn admit(&mut self, now_ms: i64, min_interval_ms: u64) -> bool {
        let effective = min_interval_ms.saturating_mul(self.backoff as u64);
        if should_sample(now_ms, self.last_processed_ms, effective) {
            self.last_processed_ms = Some(now_ms);
            true
        } else {
            false
        }
    }

    fn observe(&mut self, detections: usize) {
        if detections > 0 {
            self.backoff = 1;
        } else {
            self.backoff = self.backoff.saturating_mul(2).min(self.max_backoff);
        }
    }

    fn reset(&mut self) {
        self.last_processed_ms = None;
        self.backoff = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_sample_boundaries() {
        assert!(should_sample(0, None, 250));
        assert!(!should_sample(1249, Some(1000), 250));
        assert!(should_sample(1250, Some(1000), 250));
        assert!(should_sample(5000, Some(1000), 250));
        // Clock going backwards never admits
        assert!(!should_sample(900, Some(1000), 0));
    }

    #[test]
    fn test_zero_interval_admits_everything_forward() {
        assert!(should_sample(1000, Some(1000), 0));
    }

    #[test]
    fn test_interval_sampler_moves_cursor_on_admit() {
        let mut sampler = IntervalSampler::new();
        assert!(sampler.admit(1000, 250));
        assert_eq!(sampler.last_processed_ms(), Some(1000));

        // Burst inside the interval is rejected and does not move the cursor
        assert!(!sampler.admit(1100, 250));
        assert!(!sampler.admit(1200, 250));
        assert_eq!(sampler.last_processed_ms(), Some(1000));

        assert!(sampler.admit(1250, 250));
        assert!(!sampler.admit(1300, 250));
    }

    #[test]
    fn test_interval_sampler_reset() {
        let mut sampler = IntervalSampler::new();
        assert!(sampler.admit(1000, 250));
        sampler.reset();
        assert!(sampler.admit(1001, 250));
    }

    #[test]
    fn test_adaptive_sampler_backs_off_and_recovers() {
        let mut sampler = ActivityAdaptiveSampler::new(4);
        assert!(sampler.admit(0, 100));
        sampler.observe(0);
        assert_eq!(sampler.backoff(), 2);

        assert!(!sampler.admit(150, 100));
        assert!(sampler.admit(200, 100));
        sampler.observe(0);
        sampler.observe(0);
        assert_eq!(sampler.backoff(), 4, "capped at max_backoff");

        assert!(!sampler.admit(500, 100));
        assert!(sampler.admit(600, 100));

        sampler.observe(2);
        assert_eq!(sampler.backoff(), 1);
        assert!(sampler.admit(700, 100));
    }

    #[test]
    fn test_adaptive_sampler_reset() {
        let mut sampler = ActivityAdaptiveSampler::new(8);
        sampler.admit(0, 100);
        sampler.observe(0);
        sampler.reset();
        assert_eq!(sampler.backoff(), 1);
        assert!(sampler.admit(1, 100));
    }
}
