//! testfork -- forked test workers for parallel feature runs.
//!
//! A coordinator splits a run into feature files and hands them to workers.
//! Each worker reports its lifecycle over a status channel, accepts tasks over
//! its own task channel, runs the test engine once per task, and optionally
//! owns a virtual display for the engine to draw on.
//!
//! Observers of the status stream implement [`listener::EventListener`].

pub mod channel;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod listener;
pub mod logging;
pub mod protocol;
pub mod worker;

use anyhow::{Context, Result};

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use worker::{RunReport, Worker, WorkerState};

use display::VirtualDisplay;
use engine::CommandEngine;

/// Run one worker to completion: connect, register, execute tasks until the
/// kill sentinel, then close both channels.
pub async fn run_worker(
    status_endpoint: &str,
    task_endpoint: &str,
    manage_display: bool,
    config: &WorkerConfig,
) -> Result<RunReport> {
    let engine = CommandEngine::from_config(&config.engine);
    let mut worker = Worker::connect(status_endpoint, task_endpoint, Box::new(engine))
        .await?
        .with_channel_config(config.channel.clone());

    if manage_display {
        worker = worker.with_display(Box::new(VirtualDisplay::new(config.display.clone())));
    }

    worker
        .register()
        .await
        .with_context(|| format!("worker {task_endpoint} failed to register"))?;
    let report = worker.run().await?;
    worker.close().await?;

    tracing::info!(
        worker = %task_endpoint,
        executed = report.executed,
        failed = report.failed,
        "worker finished"
    );
    Ok(report)
}
