//! Pipeline metrics collection
//!
//! Counters for one run plus a rolling window over the last N inference
//! attempts. The window feeds both the published latency percentiles and
//! the degradation controller, so both see the same numbers.
//!
//! Owned by the orchestration loop; consumers only ever receive snapshots.

use std::collections::VecDeque;

use lpr_common::model::{
    FailureKind, LatencyPercentiles, OperatingMode, PipelineMetricsSnapshot, SkipReason,
};

/// One finished inference attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptSample {
    pub latency_ms: u64,
    pub failure: Option<FailureKind>,
}

/// Statistics over the rolling attempt window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowStats {
    pub samples: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
    /// Failures divided by the number of attempts in the window
    pub failure_ratio: f64,
}

/// Last-N attempt buffer
#[derive(Debug)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<AttemptSample>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn push(&mut self, sample: AttemptSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Change capacity, keeping the newest samples
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn stats(&self) -> WindowStats {
        if self.samples.is_empty() {
            return WindowStats::default();
        }

        let mut latencies: Vec<u64> = self.samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_unstable();
        let failures = self.samples.iter().filter(|s| s.failure.is_some()).count();

        WindowStats {
            samples: latencies.len(),
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            max_ms: latencies.last().copied().unwrap_or(0),
            failure_ratio: failures as f64 / latencies.len() as f64,
        }
    }
}

/// Nearest-rank percentile of an ascending slice (0 when empty)
pub fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    sorted[index]
}

/// Counters plus rolling window for one pipeline run
#[derive(Debug)]
pub struct MetricsCollector {
    counters: PipelineMetricsSnapshot,
    window: RollingWindow,
}

impl MetricsCollector {
    pub fn new(window: usize) -> Self {
        Self {
            counters: PipelineMetricsSnapshot::default(),
            window: RollingWindow::new(window),
        }
    }

    /// Zero everything (pipeline restart)
    pub fn reset(&mut self) {
        self.counters = PipelineMetricsSnapshot::default();
        self.window.clear();
    }

    pub fn resize_window(&mut self, window: usize) {
        self.window.resize(window);
    }

    pub fn frame_offered(&mut self) {
        self.counters.frames_offered += 1;
    }

    pub fn frame_sampled(&mut self) {
        self.counters.frames_sampled += 1;
    }

    pub fn frame_imported(&mut self) {
        self.counters.frames_imported += 1;
    }

    pub fn frame_replaced(&mut self) {
        self.counters.frames_replaced += 1;
    }

    pub fn skip(&mut self, reason: SkipReason) {
        self.counters.skips.record(reason);
    }

    pub fn stale_result(&mut self) {
        self.counters.stale_results_discarded += 1;
    }

    pub fn raw_detections(&mut self, count: usize) {
        self.counters.raw_detections += count as u64;
    }

    pub fn recognitions(&mut self, emitted: usize, suppressed: usize) {
        self.counters.recognitions_emitted += emitted as u64;
        self.counters.recognitions_suppressed += suppressed as u64;
    }

    /// Record a finished (non-stale) attempt
    pub fn record_attempt(&mut self, latency_ms: u64, failure: Option<FailureKind>) {
        self.counters.inference_count += 1;
        if let Some(kind) = failure {
            self.counters.inference_failures += 1;
            match kind {
                FailureKind::Timeout => self.counters.timeouts += 1,
                FailureKind::Runtime => self.counters.runtime_errors += 1,
                FailureKind::Disposed => self.counters.disposed_errors += 1,
            }
        }
        self.window.push(AttemptSample {
            latency_ms,
            failure,
        });
    }

    pub fn window_stats(&self) -> WindowStats {
        self.window.stats()
    }

    pub fn snapshot(&self, mode: OperatingMode, now_ms: i64) -> PipelineMetricsSnapshot {
        let stats = self.window.stats();
        PipelineMetricsSnapshot {
            latency: LatencyPercentiles {
                samples: stats.samples,
                p50_ms: stats.p50_ms,
                p95_ms: stats.p95_ms,
                max_ms: stats.max_ms,
            },
            mode,
            captured_at_ms: now_ms,
            ..self.counters.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted: Vec<u64> = (1..=20).map(|v| v * 10).collect();
        assert_eq!(percentile(&sorted, 50.0), 100);
        assert_eq!(percentile(&sorted, 95.0), 190);
        assert_eq!(percentile(&sorted, 100.0), 200);
        assert_eq!(percentile(&[7], 95.0), 7);
        assert_eq!(percentile(&[], 95.0), 0);
    }

    #[test]
    fn test_window_keeps_last_n() {
        let mut window = RollingWindow::new(3);
        for latency in [100, 200, 300, 400] {
            window.push(AttemptSample {
                latency_ms: latency,
                failure: None,
            });
        }
        assert_eq!(window.len(), 3);
        let stats = window.stats();
        assert_eq!(stats.max_ms, 400);
        assert_eq!(stats.p50_ms, 300);
    }

    #[test]
    fn test_failure_ratio_uses_sample_count() {
        let mut window = RollingWindow::new(10);
        window.push(AttemptSample {
            latency_ms: 5,
            failure: Some(FailureKind::Timeout),
        });
        for _ in 0..3 {
            window.push(AttemptSample {
                latency_ms: 5,
                failure: None,
            });
        }
        let stats = window.stats();
        assert_eq!(stats.samples, 4);
        assert!((stats.failure_ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_resize_drops_oldest() {
        let mut window = RollingWindow::new(5);
        for latency in 1..=5 {
            window.push(AttemptSample {
                latency_ms: latency,
                failure: None,
            });
        }
        window.resize(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window.stats().p50_ms, 4);
    }

    #[test]
    fn test_collector_counts_failures_by_kind() {
        let mut metrics = MetricsCollector::new(20);
        metrics.record_attempt(10, None);
        metrics.record_attempt(1500, Some(FailureKind::Timeout));
        metrics.record_attempt(20, Some(FailureKind::Runtime));
        metrics.record_attempt(0, Some(FailureKind::Disposed));
        metrics.skip(SkipReason::InvalidFormat);

        let snap = metrics.snapshot(OperatingMode::Normal, 42);
        assert_eq!(snap.inference_count, 4);
        assert_eq!(snap.inference_failures, 3);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.runtime_errors, 1);
        assert_eq!(snap.disposed_errors, 1);
        assert_eq!(snap.skips.invalid_format, 1);
        assert_eq!(snap.latency.samples, 4);
        assert_eq!(snap.latency.max_ms, 1500);
        assert_eq!(snap.captured_at_ms, 42);
    }

    #[test]
    fn test_reset_clears_counters_and_window() {
        let mut metrics = MetricsCollector::new(20);
        metrics.frame_offered();
        metrics.record_attempt(10, None);
        metrics.reset();
        let snap = metrics.snapshot(OperatingMode::Normal, 0);
        assert_eq!(snap.frames_offered, 0);
        assert_eq!(snap.latency.samples, 0);
    }
}
