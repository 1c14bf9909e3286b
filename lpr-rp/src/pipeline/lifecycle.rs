//! Pipeline lifecycle state machine
//!
//! ```text
//! Idle ─→ Starting ─→ Running ⇄ Degraded
//!            │           │         │
//!            ↓           └→ Stopping ←┘
//!          Error              │
//!                             ↓
//!                          Stopped ─→ Starting (restart)
//!
//! Idle | Starting | Stopped | Error ─→ Disposed (terminal)
//! ```
//!
//! Every accepted transition is published on the state watch channel and
//! as `PipelineStateChanged` on the event bus.

use std::sync::Arc;

use lpr_common::events::{EventBus, LprEvent};
use lpr_common::model::PipelineState;
use lpr_common::time::Clock;
use tokio::sync::watch;
use tracing::info;

use crate::error::{Error, Result};

/// Whether `from → to` is a legal lifecycle edge
pub fn can_transition(from: PipelineState, to: PipelineState) -> bool {
    use lpr_common::model::PipelineState as S;

    match (from, to) {
        (S::Disposed, _) => false,
        (S::Idle | S::Stopped | S::Error, S::Starting) => true,
        (S::Starting, S::Running) => true,
        (S::Running, S::Degraded) | (S::Degraded, S::Running) => true,
        (S::Running | S::Degraded, S::Stopping) => true,
        (S::Stopping, S::Stopped) => true,
        (S::Idle | S::Starting | S::Stopped | S::Error, S::Disposed) => true,
        (_, S::Error) => from != S::Error,
        _ => false,
    }
}

/// Current state plus its publishers
pub struct Lifecycle {
    state: PipelineState,
    state_tx: watch::Sender<PipelineState>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl Lifecycle {
    pub fn new(
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> (Self, watch::Receiver<PipelineState>) {
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let lifecycle = Self {
            state: PipelineState::Idle,
            state_tx,
            event_bus,
            clock,
        };
        (lifecycle, state_rx)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Fail with `IllegalStateTransition` unless the state is one of `allowed`
    pub fn require(&self, operation: &'static str, allowed: &[PipelineState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::IllegalStateTransition {
                state: self.state,
                operation,
            })
        }
    }

    /// Move to `to`, publishing the change
    pub fn transition(&mut self, to: PipelineState) -> Result<()> {
        let from = self.state;
        if !can_transition(from, to) {
            return Err(Error::IllegalStateTransition {
                state: from,
                operation: "transition",
            });
        }

        self.state = to;
        self.state_tx.send_replace(to);
        info!("Pipeline state: {} → {}", from, to);
        self.event_bus.emit_lossy(LprEvent::PipelineStateChanged {
            old_state: from,
            new_state: to,
            timestamp_ms: self.clock.now_ms(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lpr_common::time::ManualClock;
    use lpr_common::model::PipelineState as S;

    #[test]
    fn test_happy_path_edges() {
        assert!(can_transition(S::Idle, S::Starting));
        assert!(can_transition(S::Starting, S::Running));
        assert!(can_transition(S::Running, S::Degraded));
        assert!(can_transition(S::Degraded, S::Running));
        assert!(can_transition(S::Degraded, S::Stopping));
        assert!(can_transition(S::Stopping, S::Stopped));
        assert!(can_transition(S::Stopped, S::Starting));
        assert!(can_transition(S::Stopped, S::Disposed));
        assert!(can_transition(S::Starting, S::Error));
        assert!(can_transition(S::Error, S::Disposed));
    }

    #[test]
    fn test_illegal_edges() {
        assert!(!can_transition(S::Idle, S::Running));
        assert!(!can_transition(S::Running, S::Stopped));
        assert!(!can_transition(S::Running, S::Disposed));
        assert!(!can_transition(S::Stopped, S::Running));
        assert!(!can_transition(S::Error, S::Error));
        for to in [S::Idle, S::Starting, S::Running, S::Stopped, S::Error, S::Disposed] {
            assert!(!can_transition(S::Disposed, to), "Disposed is terminal");
        }
    }

    #[tokio::test]
    async fn test_transition_publishes_state_and_event() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let (mut lifecycle, state_rx) = Lifecycle::new(bus, Arc::new(ManualClock::new(77)));

        lifecycle.transition(S::Starting).unwrap();
        assert_eq!(*state_rx.borrow(), S::Starting);

        match events.recv().await.unwrap() {
            LprEvent::PipelineStateChanged {
                old_state,
                new_state,
                timestamp_ms,
            } => {
                assert_eq!(old_state, S::Idle);
                assert_eq!(new_state, S::Starting);
                assert_eq!(timestamp_ms, 77);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_rejected_transition_leaves_state() {
        let (mut lifecycle, state_rx) =
            Lifecycle::new(EventBus::new(4), Arc::new(ManualClock::new(0)));
        let err = lifecycle.transition(S::Running).unwrap_err();
        assert!(matches!(
            err,
            Error::IllegalStateTransition { state: S::Idle, .. }
        ));
        assert_eq!(lifecycle.state(), S::Idle);
        assert_eq!(*state_rx.borrow(), S::Idle);
    }

    #[test]
    fn test_require() {
        let (lifecycle, _rx) = Lifecycle::new(EventBus::new(4), Arc::new(ManualClock::new(0)));
        assert!(lifecycle.require("start", &[S::Idle, S::Stopped]).is_ok());
        assert!(matches!(
            lifecycle.require("stop", &[S::Running, S::Degraded]),
            Err(Error::IllegalStateTransition {
                operation: "stop",
                ..
            })
        ));
    }
}
