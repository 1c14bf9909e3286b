//! Test helpers for lpr-rp integration tests
//!
//! Provides a fully wired pipeline with deterministic collaborators:
//! - `ScriptedEngine` for inference
//! - `ManualClock` for the sampling clock
//! - `SequentialIds` for identities
//! - `InMemoryAggregates` for the aggregate lookup

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lpr_common::events::LprEvent;
use lpr_common::model::{Frame, PixelFormat, RawDetection};
use lpr_common::time::ManualClock;
use lpr_common::uuid_utils::SequentialIds;
use lpr_rp::engine::{ScriptedEngine, ScriptedResponse};
use lpr_rp::{
    InMemoryAggregates, PipelineConfig, PipelineHandle, PipelineOutputs, RecognitionOutput,
    RecognitionPipeline,
};
use tokio::sync::broadcast;

/// Config tuned for tests: no sampling gate, short timeout
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        sampling_interval_ms: 0,
        inference_timeout_ms: 1_000,
        ..Default::default()
    }
}

pub fn frame(id: &str, captured_at_ms: i64) -> Frame {
    Frame::new(id, captured_at_ms, 1280, 720, PixelFormat::Nv21)
}

pub fn plate_response(text: &str, confidence: f64, latency_ms: u64) -> ScriptedResponse {
    ScriptedResponse::detections(vec![RawDetection::new(text, confidence)], latency_ms)
}

/// Let spawned tasks run and virtual time pass
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Wired pipeline plus handles on every collaborator
pub struct TestPipeline {
    pub handle: PipelineHandle,
    pub outputs: PipelineOutputs,
    pub events: broadcast::Receiver<LprEvent>,
    pub engine: Arc<ScriptedEngine>,
    pub clock: Arc<ManualClock>,
    pub aggregates: Arc<InMemoryAggregates>,
}

impl TestPipeline {
    pub fn spawn(config: PipelineConfig, engine: ScriptedEngine) -> Self {
        let engine = Arc::new(engine);
        let clock = Arc::new(ManualClock::new(0));
        let aggregates = Arc::new(InMemoryAggregates::new());

        let (handle, outputs) =
            RecognitionPipeline::new(config, engine.clone(), aggregates.clone())
                .with_clock(clock.clone())
                .with_ids(Arc::new(SequentialIds::new()))
                .spawn()
                .expect("pipeline spawns");
        let events = handle.subscribe();

        Self {
            handle,
            outputs,
            events,
            engine,
            clock,
            aggregates,
        }
    }

    /// Spawned and started
    pub async fn running(config: PipelineConfig, engine: ScriptedEngine) -> Self {
        let pipeline = Self::spawn(config, engine);
        pipeline.handle.start().await.expect("pipeline starts");
        pipeline
    }

    /// Next recognition, applied to the aggregate store like a persistence consumer would
    pub async fn next_output(&mut self) -> RecognitionOutput {
        let output = tokio::time::timeout(Duration::from_secs(30), self.outputs.recognitions.recv())
            .await
            .expect("recognition arrives in time")
            .expect("recognition stream open");
        self.aggregates.apply(&output.plan);
        output
    }

    /// Every event currently buffered on the bus
    pub fn drain_events(&mut self) -> Vec<LprEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
