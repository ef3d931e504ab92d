use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use testfork::config::WorkerConfig;

#[derive(Parser)]
#[command(
    name = "testfork-worker",
    about = "Run forked test tasks received over a task channel",
    version,
    long_about = None
)]
struct Cli {
    /// Coordinator status endpoint (`host:port`, or a bare port on localhost)
    status_endpoint: String,

    /// Where to listen for tasks (`ip:port`, or a Unix socket path)
    task_endpoint: String,

    /// Start a virtual display for the engine (true/false/1/0/yes/no)
    #[arg(value_parser = parse_flag)]
    display: Option<bool>,

    /// Configuration file (overrides TESTFORK_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("expected true/false/1/0/yes/no, got '{other}'")),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = testfork::logging::with_bootstrap(|| WorkerConfig::resolve(cli.config.as_deref()))
        .context("failed to load configuration")?;
    testfork::logging::init(&config.logging);

    let use_display = cli.display.unwrap_or(false);
    tracing::info!(
        status = %cli.status_endpoint,
        task = %cli.task_endpoint,
        display = use_display,
        "starting worker"
    );

    testfork::run_worker(&cli.status_endpoint, &cli.task_endpoint, use_display, &config).await?;
    Ok(())
}
