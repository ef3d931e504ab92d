//! Standalone status observer: accepts worker status connections and logs
//! every event to stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use testfork::channel::resolve_status_endpoint;
use testfork::config::WorkerConfig;
use testfork::listener::{read_status_stream, Inbound, LoggingListener, StatusDispatcher};

#[derive(Parser)]
#[command(
    name = "testfork-observe",
    about = "Listen for worker status events and log them",
    version,
    long_about = None
)]
struct Cli {
    /// Address to listen on (`host:port`, or a bare port on localhost)
    #[arg(env = "TESTFORK_STATUS_BIND")]
    bind: String,

    /// Finish the run once this many worker connections have closed
    #[arg(long)]
    workers: Option<usize>,

    /// Configuration file (overrides TESTFORK_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = testfork::logging::with_bootstrap(|| WorkerConfig::resolve(cli.config.as_deref()))
        .context("failed to load configuration")?;
    testfork::logging::init(&config.logging);

    let addr = resolve_status_endpoint(&cli.bind);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind status endpoint {addr}"))?;
    info!(endpoint = %addr, "observing worker status");

    let max_line_length = config.channel.max_line_length;
    let (tx, mut rx) = mpsc::channel::<Inbound>(256);
    let mut dispatcher = StatusDispatcher::new(LoggingListener::stdout());
    let mut closed = 0usize;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    dispatcher.run_starting();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "worker connected");
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        read_status_stream(stream, max_line_length, tx).await;
                    });
                }
                Err(e) => warn!(error = %e, "failed to accept status connection"),
            },
            Some(inbound) = rx.recv() => {
                let connection_closed = matches!(inbound, Inbound::Closed { .. });
                dispatcher.handle(inbound);
                if connection_closed {
                    closed += 1;
                    if cli.workers.is_some_and(|n| closed >= n) {
                        break;
                    }
                }
            }
            _ = &mut ctrl_c => {
                dispatcher.run_interrupted();
                break;
            }
        }
    }

    let any_failed = dispatcher.run_finished();
    let summary = dispatcher.summary();
    info!(
        passed = summary.passed,
        failed = summary.failed,
        workers = summary.workers_registered,
        abnormal = dispatcher.abnormal_deaths().len(),
        "run finished"
    );
    for worker in dispatcher.abnormal_deaths() {
        warn!(%worker, "worker died without reporting worker_dead");
    }

    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}
