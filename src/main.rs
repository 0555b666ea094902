//! Render Worker Service
//!
//! Runs a pool of render workers that drive an external engine process per
//! job. Jobs are submitted as newline-delimited JSON on stdin:
//!
//! ```text
//! {"kind":"media","options":{"serve_url":"http://bundle","composition":"Intro"}}
//! ```
//!
//! ## Configuration
//!
//! Environment variables:
//! - `RENDER_MAX_CONCURRENT`: Number of concurrent renders (default: 2)
//! - `RENDER_ENGINE_PROGRAM` / `RENDER_ENGINE_ENTRY`: Engine launcher and script
//! - `RENDER_READ_TIMEOUT_SECS` / `RENDER_STALL_TIMEOUT_SECS`: Engine timeouts
//! - `RENDER_OUTPUT_DIR` / `RENDER_BASE_URL`: Where outputs land and are served
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: Log level (default: info); `LOG_FORMAT=json` for JSON logs

use std::sync::Arc;

use anyhow::{Context, Result};
use render_worker::config::WorkerConfig;
use render_worker::engine::EngineBridge;
use render_worker::job::{JobKind, RenderOptions};
use render_worker::output::LocalOutputs;
use render_worker::scheduler::RenderScheduler;
use render_worker::telemetry;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One line of the submission feed.
#[derive(Debug, Deserialize)]
struct Submission {
    kind: JobKind,
    #[serde(default)]
    options: RenderOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    info!("Starting render worker service");

    let config = WorkerConfig::from_env();
    info!(
        "Configuration: max_concurrent={}, stall_timeout_secs={}, output_dir={}",
        config.max_concurrent,
        config.engine.stall_timeout.as_secs(),
        config.output_dir.display()
    );

    let engine = EngineBridge::new(&config.engine).context("Failed to set up render engine")?;
    let outputs = LocalOutputs::new(&config.output_dir, &config.base_url);
    let scheduler = Arc::new(RenderScheduler::new(
        &config,
        Arc::new(engine),
        Arc::new(outputs),
    ));
    scheduler.start();

    let feed = tokio::spawn(read_submissions(scheduler.clone()));
    let heartbeat = tokio::spawn(heartbeat_loop(scheduler.clone(), config.heartbeat_interval));

    info!("Worker service ready, press Ctrl+C to shutdown");
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;

    info!("Received shutdown signal, stopping workers...");
    feed.abort();
    heartbeat.abort();
    scheduler.stop().await;
    telemetry::shutdown_telemetry();

    info!("Worker service shutdown complete");
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Submits one job per stdin line until stdin closes.
async fn read_submissions(scheduler: Arc<RenderScheduler>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Submission feed closed");
                return;
            }
            Err(e) => {
                error!("Failed to read submission feed: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let submission: Submission = match serde_json::from_str(&line) {
            Ok(submission) => submission,
            Err(e) => {
                warn!("Ignoring malformed submission: {}", e);
                continue;
            }
        };

        match scheduler.submit(submission.kind, submission.options) {
            Ok(job_id) => info!(job_id = %job_id, kind = %submission.kind, "Accepted submission"),
            Err(e) => error!("Failed to submit job: {}", e),
        }
    }
}

async fn heartbeat_loop(scheduler: Arc<RenderScheduler>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        telemetry::record_worker_heartbeat(scheduler.queue_length(), scheduler.in_progress_count());
    }
}
