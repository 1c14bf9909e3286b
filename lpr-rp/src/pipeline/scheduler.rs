//! Inference Scheduler
//!
//! Serializes calls into the inference engine: at most one `detect` future
//! exists at any time, and the frame-arrival path never waits on it.
//!
//! **Queueing:** one slot, latest wins, for live and imported frames alike.
//! A frame offered while inference is busy overwrites any queued frame, so
//! at most one frame ever waits. Callers that must not lose imported frames
//! pace their input on completions.
//!
//! **Attempt lifecycle:** `Idle → Dispatched → {Completed | TimedOut | Failed} → Idle`.
//! Each attempt runs the engine call in its own task under
//! `tokio::time::timeout`. Past the deadline the call is aborted and reported
//! as `EngineError::Timeout`; a panicking call is reported as a runtime
//! failure. Either way a completion is always sent, so the pipeline never
//! waits on a call that will not return. Results are matched against the
//! attempt id; `invalidate` marks the outstanding attempt stale so its result
//! is discarded on arrival.

use std::sync::Arc;
use std::time::Duration;

use lpr_common::model::{Frame, RawDetection};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::engine::{DetectOptions, EngineError, InferenceEngine};

/// Result of one attempt, delivered back to the orchestration loop
#[derive(Debug)]
pub struct Completion {
    pub attempt: u64,
    pub frame: Frame,
    pub imported: bool,
    pub elapsed_ms: u64,
    /// Bound the attempt ran under
    pub timeout_ms: u64,
    pub outcome: Result<Vec<RawDetection>, EngineError>,
}

/// What `offer` did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Sent to the engine immediately
    Dispatched,
    /// Waiting for the current attempt to finish
    Queued,
    /// Waiting, and an older queued frame was discarded
    Replaced,
}

/// Completion as seen by the scheduler
#[derive(Debug)]
pub enum Settled {
    /// Result of the attempt the pipeline is waiting for
    Current(Completion),
    /// Result of an invalidated attempt; must be discarded
    Stale(Completion),
}

#[derive(Debug)]
struct QueuedFrame {
    frame: Frame,
    imported: bool,
}

#[derive(Debug)]
struct InFlight {
    attempt: u64,
    frame_id: String,
    stale: bool,
}

/// Single-in-flight dispatcher
pub struct InferenceScheduler {
    engine: Arc<dyn InferenceEngine>,
    completions: mpsc::UnboundedSender<Completion>,
    slot: Option<QueuedFrame>,
    in_flight: Option<InFlight>,
    next_attempt: u64,
    timeout: Duration,
    options: DetectOptions,
}

impl InferenceScheduler {
    /// Create a scheduler and the receiving end of its completion channel
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        timeout: Duration,
        options: DetectOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            engine,
            completions: tx,
            slot: None,
            in_flight: None,
            next_attempt: 1,
            timeout,
            options,
        };
        (scheduler, rx)
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_options(&mut self, options: DetectOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &DetectOptions {
        &self.options
    }

    /// True while an attempt (stale or not) is outstanding
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Frames waiting for dispatch (0 or 1)
    pub fn queued(&self) -> usize {
        usize::from(self.slot.is_some())
    }

    /// Offer a live frame
    pub fn offer(&mut self, frame: Frame) -> OfferOutcome {
        self.enqueue(QueuedFrame {
            frame,
            imported: false,
        })
    }

    /// Offer an imported frame; shares the live slot
    pub fn offer_imported(&mut self, frame: Frame) -> OfferOutcome {
        self.enqueue(QueuedFrame {
            frame,
            imported: true,
        })
    }

    /// Match a completion to the outstanding attempt and dispatch the next frame
    pub fn settle(&mut self, completion: Completion) -> Settled {
        let current = match &self.in_flight {
            Some(in_flight) if in_flight.attempt == completion.attempt => {
                let stale = in_flight.stale;
                self.in_flight = None;
                !stale
            }
            // Not the outstanding attempt: leave the slot alone
            _ => false,
        };

        if self.in_flight.is_none() {
            if let Some(next) = self.slot.take() {
                self.dispatch(next);
            }
        }

        if current {
            Settled::Current(completion)
        } else {
            Settled::Stale(completion)
        }
    }

    /// Drop the queued frame and mark the outstanding attempt stale
    ///
    /// The outstanding attempt keeps occupying the engine until it returns,
    /// so a restart never puts a second call in flight. Returns the number
    /// of queued frames dropped.
    pub fn invalidate(&mut self) -> usize {
        let dropped = self.queued();
        self.slot = None;
        if let Some(in_flight) = self.in_flight.as_mut() {
            debug!(
                "Attempt {} for frame {} marked stale",
                in_flight.attempt, in_flight.frame_id
            );
            in_flight.stale = true;
        }
        dropped
    }

    fn enqueue(&mut self, queued: QueuedFrame) -> OfferOutcome {
        if self.in_flight.is_none() {
            self.dispatch(queued);
            return OfferOutcome::Dispatched;
        }

        match self.slot.replace(queued) {
            Some(replaced) => {
                debug!(
                    "Queued frame {} replaced before dispatch",
                    replaced.frame.id
                );
                OfferOutcome::Replaced
            }
            None => OfferOutcome::Queued,
        }
    }

    fn dispatch(&mut self, queued: QueuedFrame) {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.in_flight = Some(InFlight {
            attempt,
            frame_id: queued.frame.id.clone(),
            stale: false,
        });
        debug!("Dispatching frame {} as attempt {}", queued.frame.id, attempt);

        let engine = Arc::clone(&self.engine);
        let options = self.options.clone();
        let timeout = self.timeout;
        let tx = self.completions.clone();
        let QueuedFrame { frame, imported } = queued;

        tokio::spawn(async move {
            let started = Instant::now();
            let call_frame = frame.clone();
            let mut call =
                tokio::spawn(async move { engine.detect(&call_frame, &options).await });

            let outcome = match tokio::time::timeout(timeout, &mut call).await {
                Ok(Ok(result)) => result,
                Ok(Err(join)) => {
                    let err = EngineError::from_join("detect", join);
                    error!("Inference for frame {} did not complete: {}", frame.id, err);
                    Err(err)
                }
                Err(_) => {
                    // Wait for the abort so the call is gone before the next dispatch
                    call.abort();
                    let _ = call.await;
                    Err(EngineError::Timeout)
                }
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            // Receiver gone means the pipeline loop has exited
            let _ = tx.send(Completion {
                attempt,
                frame,
                imported,
                elapsed_ms,
                timeout_ms: timeout.as_millis() as u64,
                outcome,
            });
        });
    }
}
