//! Render Worker Library
//!
//! Accepts render jobs, runs them on a bounded worker pool, and drives an
//! external rendering engine over a JSON-lines subprocess bridge.
//!
//! ## Module Overview
//!
//! - `config`: worker configuration from `RENDER_*` environment variables
//! - `engine`: subprocess bridge to the render engine
//! - `error`: engine and scheduler error types
//! - `job`: job model and state transitions
//! - `output`: output path and URL resolution
//! - `queue`: in-memory FIFO work queue
//! - `scheduler`: worker pool tying queue, store, and engine together
//! - `store`: in-memory job registry
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use render_worker::{
//!     config::WorkerConfig,
//!     engine::EngineBridge,
//!     job::{JobKind, RenderOptions},
//!     output::LocalOutputs,
//!     scheduler::RenderScheduler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = WorkerConfig::from_env();
//!     let engine = EngineBridge::new(&config.engine)?;
//!     let outputs = LocalOutputs::new(&config.output_dir, &config.base_url);
//!
//!     let scheduler = RenderScheduler::new(&config, Arc::new(engine), Arc::new(outputs));
//!     scheduler.start();
//!
//!     let mut options = RenderOptions::new();
//!     options.insert("composition".into(), "Intro".into());
//!     let job_id = scheduler.submit(JobKind::Media, options)?;
//!
//!     let job = scheduler.wait_for(&job_id).await;
//!     println!("{:?}", job.map(|job| job.status));
//!
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod output;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod telemetry;
