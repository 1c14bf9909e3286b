//! Recognition pipeline orchestrator
//!
//! # Architecture
//! One control task owns every piece of mutable pipeline state (dedup window,
//! rolling metrics, degradation controller, sampler, scheduler). Everything
//! reaches it as a message:
//!
//! - **Commands** from [`PipelineHandle`]: start, stop, dispose, frames, config
//! - **Completions** from the inference scheduler's spawned attempts
//! - **Load results** from the engine warm-up task
//!
//! The loop never awaits the engine's `detect`, so frame intake stays
//! responsive while inference runs.
//!
//! # Outputs
//! - `(RecognitionEvent, UpsertPlan)` pairs on the [`PipelineOutputs`]
//!   channel (unbounded, single consumer, each plan delivered once)
//! - lifecycle state and metrics snapshots on `watch` channels
//! - best-effort copies of everything on the [`EventBus`]

pub mod degradation;
pub mod lifecycle;
pub mod metrics;
pub mod recognition;
pub mod scheduler;

pub use degradation::{DegradationController, DegradationPolicy, ModeChange};
pub use lifecycle::{can_transition, Lifecycle};
pub use metrics::{MetricsCollector, RollingWindow, WindowStats};
pub use recognition::{RecognitionOutput, RecognitionStage};
pub use scheduler::{InferenceScheduler, OfferOutcome};

use std::sync::Arc;

use lpr_common::events::{EventBus, LprEvent};
use lpr_common::model::{
    Frame, OperatingMode, PipelineMetricsSnapshot, PipelineState, RawDetection, SkipReason,
};
use lpr_common::time::{millis_to_duration, Clock, SystemClock};
use lpr_common::uuid_utils::{IdentityProvider, RandomIds};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::aggregates::AggregateLookup;
use crate::config::PipelineConfig;
use crate::engine::{DetectOptions, EngineError, EngineInfo, InferenceEngine, LoadResult};
use crate::error::{Error, Result};
use crate::services::{IntervalSampler, SamplingStrategy};
use scheduler::{Completion, Settled};

/// What happened to a frame handed to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Sent to the engine immediately
    Dispatched,
    /// Waiting behind the in-flight inference
    Queued,
    /// Waiting, after overwriting an older undispatched frame
    Replaced,
    /// Not processed
    Dropped(SkipReason),
}

impl From<OfferOutcome> for FrameDisposition {
    fn from(outcome: OfferOutcome) -> Self {
        match outcome {
            OfferOutcome::Dispatched => FrameDisposition::Dispatched,
            OfferOutcome::Queued => FrameDisposition::Queued,
            OfferOutcome::Replaced => FrameDisposition::Replaced,
        }
    }
}

/// Receiving side of the recognition stream
///
/// Closed after `dispose()`.
pub struct PipelineOutputs {
    pub recognitions: mpsc::UnboundedReceiver<RecognitionOutput>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Start(Reply<()>),
    Stop(Reply<()>),
    Dispose(Reply<()>),
    Frame {
        frame: Frame,
        imported: bool,
        reply: Reply<FrameDisposition>,
    },
    UpdateConfig {
        config: Box<PipelineConfig>,
        reply: Reply<()>,
    },
}

struct LoadCompleted {
    generation: u64,
    result: std::result::Result<LoadResult, EngineError>,
}

/// Pipeline builder
///
/// Collaborators default to the wall clock, random UUIDs and the fixed
/// interval sampler; tests swap in deterministic ones.
pub struct RecognitionPipeline {
    config: PipelineConfig,
    engine: Arc<dyn InferenceEngine>,
    aggregates: Arc<dyn AggregateLookup>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdentityProvider>,
    sampler: Box<dyn SamplingStrategy>,
    event_bus: Option<EventBus>,
}

impl RecognitionPipeline {
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn InferenceEngine>,
        aggregates: Arc<dyn AggregateLookup>,
    ) -> Self {
        Self {
            config,
            engine,
            aggregates,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIds),
            sampler: Box::new(IntervalSampler::new()),
            event_bus: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdentityProvider>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_sampler(mut self, sampler: Box<dyn SamplingStrategy>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Publish on an existing bus instead of creating one
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Validate the config and start the control task
    ///
    /// Must be called inside a tokio runtime. The pipeline starts `Idle`.
    pub fn spawn(self) -> Result<(PipelineHandle, PipelineOutputs)> {
        self.config.validate()?;

        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(self.config.event_bus_capacity));
        let engine_info = self.engine.metadata();

        let (lifecycle, state_rx) = Lifecycle::new(event_bus.clone(), Arc::clone(&self.clock));
        let (scheduler, completions) = InferenceScheduler::new(
            Arc::clone(&self.engine),
            millis_to_duration(self.config.inference_timeout_ms),
            detect_options(&self.config, &engine_info),
        );
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();
        let (recognitions_tx, recognitions_rx) = mpsc::unbounded_channel();

        let metrics = MetricsCollector::new(self.config.degrade_failure_window);
        let (metrics_tx, metrics_rx) =
            watch::channel(metrics.snapshot(OperatingMode::Normal, self.clock.now_ms()));

        let control = PipelineLoop {
            controller: DegradationController::new(DegradationPolicy::from(&self.config)),
            stage: RecognitionStage::new(self.config.dedup_policy),
            effective: self.config.clone(),
            base: self.config,
            engine: self.engine,
            engine_info,
            aggregates: self.aggregates,
            clock: self.clock,
            ids: self.ids,
            sampler: self.sampler,
            event_bus: event_bus.clone(),
            lifecycle,
            scheduler,
            metrics,
            metrics_tx,
            commands: commands_rx,
            completions,
            loads_tx,
            loads: loads_rx,
            load_generation: 0,
            pending_start: None,
            recognitions: Some(recognitions_tx),
        };
        tokio::spawn(control.run());

        let handle = PipelineHandle {
            commands: commands_tx,
            state_rx,
            metrics_rx,
            event_bus,
        };
        let outputs = PipelineOutputs {
            recognitions: recognitions_rx,
        };
        Ok((handle, outputs))
    }
}

/// Cloneable front door to a running pipeline
#[derive(Clone)]
pub struct PipelineHandle {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<PipelineState>,
    metrics_rx: watch::Receiver<PipelineMetricsSnapshot>,
    event_bus: EventBus,
}

impl PipelineHandle {
    /// Load and warm the engine; resolves once `Running` (or `Error`)
    ///
    /// Allowed from `Idle`, `Stopped` and `Error`. Restarting resets metrics.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Stop sampling; an in-flight result is discarded when it arrives
    ///
    /// A no-op when already stopped (or never started).
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Release the engine and close the recognition stream (idempotent)
    pub async fn dispose(&self) -> Result<()> {
        match self.request(Command::Dispose).await {
            Err(Error::PipelineClosed) if self.state() == PipelineState::Disposed => Ok(()),
            other => other,
        }
    }

    /// Offer a live frame (subject to the sampling interval)
    ///
    /// Outside `Running`/`Degraded` the frame is dropped. After `dispose()`
    /// this fails with `IllegalStateTransition`.
    pub async fn feed_frame(&self, frame: Frame) -> Result<FrameDisposition> {
        self.request(|reply| Command::Frame {
            frame,
            imported: false,
            reply,
        })
        .await
    }

    /// Offer a frame from offline import (no sampling gate, never replaced)
    pub async fn ingest_imported_frame(&self, frame: Frame) -> Result<FrameDisposition> {
        self.request(|reply| Command::Frame {
            frame,
            imported: true,
            reply,
        })
        .await
    }

    /// Replace the configuration snapshot
    ///
    /// An active degradation delta is re-applied on top of the new snapshot.
    pub async fn update_config(&self, config: PipelineConfig) -> Result<()> {
        self.request(|reply| Command::UpdateConfig {
            config: Box::new(config),
            reply,
        })
        .await
    }

    pub fn state(&self) -> PipelineState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every lifecycle transition
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state_rx.clone()
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics_rx.borrow().clone()
    }

    pub fn watch_metrics(&self) -> watch::Receiver<PipelineMetricsSnapshot> {
        self.metrics_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LprEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .map_err(|_| Error::PipelineClosed)?;
        reply_rx.await.map_err(|_| Error::PipelineClosed)?
    }
}

fn detect_options(config: &PipelineConfig, info: &EngineInfo) -> DetectOptions {
    DetectOptions {
        per_char_scores: config.per_char_scoring && info.supports_char_scores,
        max_detections: config.max_detections_per_frame,
        region_hint: config.region_hint.clone(),
    }
}

/// State owned by the control task
struct PipelineLoop {
    /// Snapshot supplied by the caller
    base: PipelineConfig,
    /// `base` plus any auto-applied degradation delta
    effective: PipelineConfig,
    engine: Arc<dyn InferenceEngine>,
    engine_info: EngineInfo,
    aggregates: Arc<dyn AggregateLookup>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdentityProvider>,
    sampler: Box<dyn SamplingStrategy>,
    event_bus: EventBus,
    lifecycle: Lifecycle,
    scheduler: InferenceScheduler,
    stage: RecognitionStage,
    metrics: MetricsCollector,
    metrics_tx: watch::Sender<PipelineMetricsSnapshot>,
    controller: DegradationController,
    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<Completion>,
    loads_tx: mpsc::UnboundedSender<LoadCompleted>,
    loads: mpsc::UnboundedReceiver<LoadCompleted>,
    load_generation: u64,
    pending_start: Option<Reply<()>>,
    recognitions: Option<mpsc::UnboundedSender<RecognitionOutput>>,
}

impl PipelineLoop {
    async fn run(mut self) {
        info!(
            "Recognition pipeline ready (engine {} {})",
            self.engine_info.name, self.engine_info.version
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(completion) = self.completions.recv() => self.on_completion(completion),
                Some(loaded) = self.loads.recv() => self.on_loaded(loaded).await,
            }
            self.publish_metrics();
        }

        if !self.lifecycle.state().is_terminal() {
            info!("All pipeline handles dropped, disposing");
            self.dispose().await;
        }
        debug!("Recognition pipeline loop exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => self.start(reply),
            Command::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            Command::Dispose(reply) => {
                self.dispose().await;
                let _ = reply.send(Ok(()));
            }
            Command::Frame {
                frame,
                imported,
                reply,
            } => {
                let _ = reply.send(self.on_frame(frame, imported));
            }
            Command::UpdateConfig { config, reply } => {
                let _ = reply.send(self.update_config(*config));
            }
        }
    }

    fn start(&mut self, reply: Reply<()>) {
        let allowed = [
            PipelineState::Idle,
            PipelineState::Stopped,
            PipelineState::Error,
        ];
        if let Err(e) = self.lifecycle.require("start", &allowed) {
            let _ = reply.send(Err(e));
            return;
        }
        if let Err(e) = self.lifecycle.transition(PipelineState::Starting) {
            let _ = reply.send(Err(e));
            return;
        }

        self.metrics.reset();
        self.controller.reset();
        self.sampler.reset();
        self.apply_effective_config();

        self.load_generation += 1;
        let generation = self.load_generation;
        let engine = Arc::clone(&self.engine);
        let mode = self.effective.engine_load_mode;
        let tx = self.loads_tx.clone();
        info!("Loading inference engine ({:?})", mode);
        tokio::spawn(async move {
            let result = match tokio::spawn(async move { engine.load(mode).await }).await {
                Ok(result) => result,
                Err(join) => Err(EngineError::from_join("load", join)),
            };
            let _ = tx.send(LoadCompleted { generation, result });
        });

        self.pending_start = Some(reply);
    }

    async fn on_loaded(&mut self, loaded: LoadCompleted) {
        if loaded.generation != self.load_generation
            || self.lifecycle.state() != PipelineState::Starting
        {
            debug!("Discarding superseded engine load");
            if self.lifecycle.state().is_terminal() && loaded.result.is_ok() {
                self.engine.dispose().await;
            }
            return;
        }

        let result = match loaded.result {
            Ok(load) => {
                info!(
                    "Inference engine {} {} loaded ({:?}, warmup {}ms, input {}x{})",
                    self.engine_info.name,
                    self.engine_info.version,
                    load.mode,
                    load.warmup_ms,
                    self.engine_info.input_width,
                    self.engine_info.input_height
                );
                self.lifecycle.transition(PipelineState::Running)
            }
            Err(e) => {
                error!("Inference engine failed to load: {}", e);
                match self.lifecycle.transition(PipelineState::Error) {
                    Ok(()) => Err(Error::EngineLoad(e.to_string())),
                    Err(transition) => Err(transition),
                }
            }
        };

        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(result);
        }
    }

    fn stop(&mut self) -> Result<()> {
        match self.lifecycle.state() {
            PipelineState::Running | PipelineState::Degraded => self.halt(),
            PipelineState::Idle | PipelineState::Stopped | PipelineState::Error => {
                debug!("Stop requested while {}, nothing to do", self.lifecycle.state());
                Ok(())
            }
            state => Err(Error::IllegalStateTransition {
                state,
                operation: "stop",
            }),
        }
    }

    /// Running/Degraded → Stopping → Stopped
    fn halt(&mut self) -> Result<()> {
        self.lifecycle.transition(PipelineState::Stopping)?;
        let dropped = self.scheduler.invalidate();
        if dropped > 0 {
            debug!("Dropped {} queued frame(s) on stop", dropped);
        }
        self.lifecycle.transition(PipelineState::Stopped)
    }

    async fn dispose(&mut self) {
        match self.lifecycle.state() {
            PipelineState::Disposed => {
                debug!("Pipeline already disposed");
                return;
            }
            PipelineState::Running | PipelineState::Degraded => {
                if let Err(e) = self.halt() {
                    warn!("Stop during dispose failed: {}", e);
                }
            }
            PipelineState::Starting => {
                // Any load still running is superseded
                self.load_generation += 1;
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(Err(Error::EngineDisposed));
                }
            }
            _ => {}
        }

        self.scheduler.invalidate();
        self.engine.dispose().await;
        if let Err(e) = self.lifecycle.transition(PipelineState::Disposed) {
            error!("Dispose transition rejected: {}", e);
        }
        // Closes the recognition stream for the consumer
        self.recognitions = None;
        info!("Recognition pipeline disposed");
    }

    fn on_frame(&mut self, frame: Frame, imported: bool) -> Result<FrameDisposition> {
        let state = self.lifecycle.state();
        if state.is_terminal() {
            return Err(Error::IllegalStateTransition {
                state,
                operation: if imported {
                    "ingest_imported_frame"
                } else {
                    "feed_frame"
                },
            });
        }

        if imported {
            self.metrics.frame_imported();
        } else {
            self.metrics.frame_offered();
        }

        if !state.is_processing() {
            debug!("Frame {} dropped: pipeline is {}", frame.id, state);
            self.metrics.skip(SkipReason::NotRunning);
            return Ok(FrameDisposition::Dropped(SkipReason::NotRunning));
        }

        if imported {
            let outcome = self.scheduler.offer_imported(frame);
            if outcome == OfferOutcome::Replaced {
                self.metrics.frame_replaced();
            }
            return Ok(outcome.into());
        }

        if !self
            .sampler
            .admit(self.clock.now_ms(), self.effective.sampling_interval_ms)
        {
            self.metrics.skip(SkipReason::SamplingInterval);
            return Ok(FrameDisposition::Dropped(SkipReason::SamplingInterval));
        }
        self.metrics.frame_sampled();

        let outcome = self.scheduler.offer(frame);
        if outcome == OfferOutcome::Replaced {
            self.metrics.frame_replaced();
        }
        Ok(outcome.into())
    }

    fn on_completion(&mut self, completion: Completion) {
        let completion = match self.scheduler.settle(completion) {
            Settled::Current(c) if self.lifecycle.state().is_processing() => c,
            Settled::Current(c) | Settled::Stale(c) => {
                debug!(
                    "Discarding stale result for frame {} (attempt {})",
                    c.frame.id, c.attempt
                );
                self.metrics.stale_result();
                return;
            }
        };

        let failure = completion.outcome.as_ref().err().map(EngineError::kind);
        self.metrics.record_attempt(completion.elapsed_ms, failure);

        match completion.outcome {
            Ok(detections) => {
                if !completion.imported {
                    self.sampler.observe(detections.len());
                }
                self.metrics.raw_detections(detections.len());
                self.process_detections(&completion.frame, detections);
            }
            Err(err) => {
                let kind = err.kind();
                let message = err.into_pipeline_error(completion.timeout_ms).to_string();
                warn!(
                    "Inference failed for frame {} after {}ms: {}",
                    completion.frame.id, completion.elapsed_ms, message
                );
                self.event_bus.emit_lossy(LprEvent::InferenceFailed {
                    kind,
                    frame_id: completion.frame.id.clone(),
                    message,
                    timestamp_ms: self.clock.now_ms(),
                });
            }
        }

        self.evaluate_degradation();
        self.event_bus.emit_lossy(LprEvent::MetricsUpdated {
            snapshot: self.snapshot(),
        });
    }

    fn process_detections(&mut self, frame: &Frame, detections: Vec<RawDetection>) {
        let report = self.stage.process(
            frame,
            detections,
            &self.effective,
            self.aggregates.as_ref(),
            self.ids.as_ref(),
        );

        for reason in &report.skips {
            self.metrics.skip(*reason);
        }
        self.metrics
            .recognitions(report.outputs.len(), report.suppressed.len());

        for event in report.suppressed {
            debug!(
                "Suppressed repeat sighting of {} in frame {}",
                event.plate, event.frame_id
            );
            self.event_bus.emit_lossy(LprEvent::DetectionSuppressed {
                plate: event.plate,
                captured_at_ms: event.captured_at_ms,
            });
        }

        for output in report.outputs {
            info!(
                "Plate {} recognized in frame {} (confidence {}, {})",
                output.event.plate,
                output.event.frame_id,
                output.event.confidence,
                if output.plan.is_new_aggregate() {
                    "new"
                } else {
                    "known"
                }
            );
            self.event_bus.emit_lossy(LprEvent::PlateRecognized {
                event: output.event.clone(),
                plan: output.plan.clone(),
            });
            self.deliver(output);
        }
    }

    fn deliver(&mut self, output: RecognitionOutput) {
        if let Some(tx) = &self.recognitions {
            if tx.send(output).is_err() {
                warn!("Recognition consumer dropped; further plans are discarded");
                self.recognitions = None;
            }
        }
    }

    fn evaluate_degradation(&mut self) {
        let stats = self.metrics.window_stats();
        let Some(change) = self.controller.evaluate(&stats) else {
            return;
        };

        let target = match change.mode {
            OperatingMode::Degraded => {
                warn!(
                    "Entering degraded mode (p95 {}ms, failure ratio {:.2}, sampling → {:?}ms)",
                    stats.p95_ms, stats.failure_ratio, change.delta.sampling_interval_ms
                );
                PipelineState::Degraded
            }
            OperatingMode::Normal => {
                info!(
                    "Recovered from degraded mode (p95 {}ms, failure ratio {:.2})",
                    stats.p95_ms, stats.failure_ratio
                );
                PipelineState::Running
            }
        };

        if let Err(e) = self.lifecycle.transition(target) {
            error!("Degradation transition rejected: {}", e);
        }
        self.event_bus.emit_lossy(LprEvent::DegradationChanged {
            mode: change.mode,
            delta: change.delta,
            timestamp_ms: self.clock.now_ms(),
        });

        if self.base.auto_apply_degradation {
            self.apply_effective_config();
        }
    }

    fn update_config(&mut self, config: PipelineConfig) -> Result<()> {
        let state = self.lifecycle.state();
        if state.is_terminal() {
            return Err(Error::IllegalStateTransition {
                state,
                operation: "update_config",
            });
        }
        config.validate()?;

        if config.event_bus_capacity != self.base.event_bus_capacity {
            warn!("event_bus_capacity changes take effect on the next spawn only");
        }
        self.controller.set_policy(DegradationPolicy::from(&config));
        self.base = config;
        self.apply_effective_config();
        info!("Pipeline configuration updated");
        Ok(())
    }

    /// Recompute `effective` and push it into the components that cache settings
    fn apply_effective_config(&mut self) {
        self.effective = if self.base.auto_apply_degradation {
            self.base.with_delta(&self.controller.active_delta())
        } else {
            self.base.clone()
        };

        self.scheduler
            .set_timeout(millis_to_duration(self.effective.inference_timeout_ms));
        self.scheduler
            .set_options(detect_options(&self.effective, &self.engine_info));
        self.stage.set_policy(self.effective.dedup_policy);
        self.metrics
            .resize_window(self.effective.degrade_failure_window);
    }

    fn snapshot(&self) -> PipelineMetricsSnapshot {
        self.metrics
            .snapshot(self.controller.mode(), self.clock.now_ms())
    }

    fn publish_metrics(&self) {
        self.metrics_tx.send_replace(self.snapshot());
    }
}
