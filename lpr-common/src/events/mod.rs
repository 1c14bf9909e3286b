//! Event types for the LPR event system
//!
//! Provides shared event definitions and the EventBus used to fan pipeline
//! activity out to UI, logging and diagnostics consumers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{
    ConfigDelta, FailureKind, NormalizedPlate, OperatingMode, PipelineMetricsSnapshot,
    PipelineState, RecognitionEvent, UpsertPlan,
};

/// LPR event types
///
/// Events are broadcast via EventBus and can be serialized for transmission.
/// All timestamps are epoch milliseconds taken from the pipeline clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LprEvent {
    /// Pipeline lifecycle state changed
    ///
    /// Triggers:
    /// - UI: Update pipeline status indicator
    PipelineStateChanged {
        old_state: PipelineState,
        new_state: PipelineState,
        timestamp_ms: i64,
    },

    /// A plate sighting passed deduplication and was planned for persistence
    ///
    /// Triggers:
    /// - UI: Show recognized plate
    ///
    /// NOTE: Best-effort copy. Persistence consumes plans from the dedicated
    /// recognition channel, not from here.
    PlateRecognized {
        event: RecognitionEvent,
        plan: UpsertPlan,
    },

    /// A sighting was collapsed into an earlier one inside the dedup window
    DetectionSuppressed {
        plate: NormalizedPlate,
        captured_at_ms: i64,
    },

    /// Inference attempt failed (timeout, runtime error, disposed engine)
    InferenceFailed {
        kind: FailureKind,
        frame_id: String,
        message: String,
        timestamp_ms: i64,
    },

    /// Degradation controller switched operating mode
    ///
    /// Triggers:
    /// - Config service: Optionally persist the advised delta
    DegradationChanged {
        mode: OperatingMode,
        delta: ConfigDelta,
        timestamp_ms: i64,
    },

    /// Periodic metrics snapshot
    MetricsUpdated { snapshot: PipelineMetricsSnapshot },
}

impl LprEvent {
    /// Short name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            LprEvent::PipelineStateChanged { .. } => "PipelineStateChanged",
            LprEvent::PlateRecognized { .. } => "PlateRecognized",
            LprEvent::DetectionSuppressed { .. } => "DetectionSuppressed",
            LprEvent::InferenceFailed { .. } => "InferenceFailed",
            LprEvent::DegradationChanged { .. } => "DegradationChanged",
            LprEvent::MetricsUpdated { .. } => "MetricsUpdated",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers never block the pipeline)
/// - Multiple concurrent subscribers
/// - Drop-oldest overflow: lagging subscribers see `RecvError::Lagged`
///
/// # Capacity Recommendations
///
/// - Desktop: 1000
/// - Constrained device: 100
/// - Testing: 10-100
///
/// # Examples
///
/// ```
/// use lpr_common::events::{EventBus, LprEvent};
/// use lpr_common::model::PipelineState;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(LprEvent::PipelineStateChanged {
///     old_state: PipelineState::Idle,
///     new_state: PipelineState::Starting,
///     timestamp_ms: 0,
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(LprEvent::PipelineStateChanged { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LprEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<LprEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: LprEvent) -> Result<usize, broadcast::error::SendError<LprEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LprEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn state_event(ts: i64) -> LprEvent {
        LprEvent::PipelineStateChanged {
            old_state: PipelineState::Running,
            new_state: PipelineState::Degraded,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(bus.emit(state_event(1)).is_err());
        // Lossy variant never fails
        bus.emit_lossy(state_event(2));
    }

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new(10);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.emit(state_event(5)).unwrap(), 2);

        for rx in [&mut a, &mut b] {
            match rx.try_recv() {
                Ok(LprEvent::PipelineStateChanged { timestamp_ms, .. }) => {
                    assert_eq!(timestamp_ms, 5)
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(matches!(a.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for ts in 0..5 {
            bus.emit_lossy(state_event(ts));
        }

        match rx.recv().await {
            Err(RecvError::Lagged(missed)) => assert_eq!(missed, 3),
            other => panic!("expected lag, got {:?}", other),
        }
        // Oldest surviving event is delivered next
        match rx.recv().await {
            Ok(LprEvent::PipelineStateChanged { timestamp_ms, .. }) => assert_eq!(timestamp_ms, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(state_event(9)).unwrap();
        assert_eq!(json["type"], "PipelineStateChanged");
        assert_eq!(json["new_state"], "degraded");
        assert_eq!(state_event(0).event_type(), "PipelineStateChanged");
    }
}
