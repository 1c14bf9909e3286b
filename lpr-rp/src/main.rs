//! Recognition Pipeline replay (lpr-rp) - Main entry point
//!
//! Replays a recorded scenario through the real pipeline against a scripted
//! engine. Every `(event, plan)` pair is printed as one JSON line on stdout,
//! followed by the final metrics snapshot. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lpr_common::model::PipelineMetricsSnapshot;
use lpr_common::time::ManualClock;
use lpr_rp::pipeline::FrameDisposition;
use lpr_rp::scenario::Scenario;
use lpr_rp::{InMemoryAggregates, PipelineHandle, RecognitionPipeline, TomlConfig};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for lpr-rp
#[derive(Parser, Debug)]
#[command(name = "lpr-rp")]
#[command(about = "Replay a recorded scenario through the plate recognition pipeline")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "LPR_CONFIG")]
    config: Option<PathBuf>,

    /// Scenario file (JSON)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Feed frames as offline import (no sampling gate, paced on completions)
    #[arg(long)]
    import: bool,

    /// Log filter, e.g. "debug" or "lpr_rp=trace"
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(args.log_level.as_deref(), &config)?;

    let scenario = Scenario::from_path(&args.scenario)
        .with_context(|| format!("Failed to load scenario {}", args.scenario.display()))?;
    info!(
        "Replaying {} frame(s) from {} ({} mode)",
        scenario.frames.len(),
        args.scenario.display(),
        if args.import { "import" } else { "live" }
    );

    let start_ms = scenario.frames().next().map(|f| f.captured_at_ms).unwrap_or(0);
    let clock = Arc::new(ManualClock::new(start_ms));
    let aggregates = Arc::new(InMemoryAggregates::new());
    let engine = Arc::new(scenario.engine());

    let (handle, mut outputs) =
        RecognitionPipeline::new(config.pipeline.clone(), engine, aggregates.clone())
            .with_clock(clock.clone())
            .spawn()
            .context("Failed to create pipeline")?;

    let consumer = {
        let aggregates = Arc::clone(&aggregates);
        tokio::spawn(async move {
            let mut written = 0usize;
            while let Some(output) = outputs.recognitions.recv().await {
                aggregates.apply(&output.plan);
                match serde_json::to_string(&output) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to serialize recognition: {}", e),
                }
                written += 1;
            }
            written
        })
    };

    handle.start().await.context("Failed to start pipeline")?;

    tokio::select! {
        result = replay(&handle, &scenario, &clock, args.import, config.pipeline.inference_timeout_ms) => {
            result?;
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    let snapshot = handle.metrics();
    handle.stop().await.context("Failed to stop pipeline")?;
    handle.dispose().await.context("Failed to dispose pipeline")?;

    let written = consumer.await.context("Recognition consumer panicked")?;
    print_metrics(&snapshot)?;
    info!(
        "Replay finished: {} recognition(s), {} plate aggregate(s)",
        written,
        aggregates.len()
    );
    Ok(())
}

/// Feed every frame, then wait for the dispatched ones to finish
///
/// Imported frames share the pipeline's single queue slot, so each one is
/// fed only after the previous attempt has settled.
async fn replay(
    handle: &PipelineHandle,
    scenario: &Scenario,
    clock: &ManualClock,
    import: bool,
    inference_timeout_ms: u64,
) -> Result<()> {
    let mut metrics = handle.watch_metrics();
    let mut expected = 0u64;
    let mut previous_ms: Option<i64> = None;

    for frame in scenario.frames() {
        if !import {
            // Pace live frames by their capture gaps
            if let Some(prev) = previous_ms {
                let gap = frame.captured_at_ms.saturating_sub(prev).max(0) as u64;
                tokio::time::sleep(Duration::from_millis(gap)).await;
            }
            previous_ms = Some(frame.captured_at_ms);
        }
        clock.set(frame.captured_at_ms);

        let disposition = if import {
            handle.ingest_imported_frame(frame.clone()).await
        } else {
            handle.feed_frame(frame.clone()).await
        }
        .with_context(|| format!("Failed to feed frame {}", frame.id))?;
        debug!("Frame {}: {:?}", frame.id, disposition);

        // A replacement swaps one queued frame for another
        if matches!(
            disposition,
            FrameDisposition::Dispatched | FrameDisposition::Queued
        ) {
            expected += 1;
            if import {
                wait_settled(&mut metrics, expected, inference_timeout_ms).await;
            }
        }
    }

    wait_settled(
        &mut metrics,
        expected,
        inference_timeout_ms.saturating_mul(expected.max(1)),
    )
    .await;
    Ok(())
}

/// Wait until `expected` attempts have finished or been discarded
async fn wait_settled(
    metrics: &mut watch::Receiver<PipelineMetricsSnapshot>,
    expected: u64,
    budget_ms: u64,
) {
    let grace = Duration::from_millis(budget_ms.saturating_add(1_000));
    let timed_out = tokio::time::timeout(
        grace,
        metrics.wait_for(|m| m.inference_count + m.stale_results_discarded >= expected),
    )
    .await
    .is_err();
    if timed_out {
        warn!("Timed out waiting for {} inference(s) to finish", expected);
    }
}

fn print_metrics(snapshot: &PipelineMetricsSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize metrics")?;
    println!("{}", json);
    Ok(())
}

fn init_tracing(cli_filter: Option<&str>, config: &TomlConfig) -> Result<()> {
    let level = &config.logging.level;
    let filter = match cli_filter {
        Some(filter) => tracing_subscriber::EnvFilter::try_new(filter)
            .with_context(|| format!("Invalid log filter {:?}", filter))?,
        None => tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("lpr_rp={},lpr_common={}", level, level).into()
        }),
    };

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}
