//! Outbound status channel: worker -> coordinator.
//!
//! Opened once at worker startup and held until the worker closes it as its
//! very last action. Each [`StatusEvent`] becomes one JSON array line.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{Result, WorkerError};
use crate::protocol::{encode_line, StatusEvent, StatusMessage};

/// Turn a status endpoint argument into a connectable address.
///
/// A bare port number refers to a coordinator on the local machine.
pub fn resolve_status_endpoint(endpoint: &str) -> String {
    match endpoint.trim().parse::<u16>() {
        Ok(port) => format!("localhost:{port}"),
        Err(_) => endpoint.trim().to_string(),
    }
}

/// Line-delimited JSON writer attributing every event to one worker.
pub struct StatusChannel<W = TcpStream> {
    writer: W,
    worker: String,
}

impl StatusChannel<TcpStream> {
    /// Connect to the coordinator. Failure is fatal for the worker.
    pub async fn connect(endpoint: &str, worker: impl Into<String>) -> Result<Self> {
        let addr = resolve_status_endpoint(endpoint);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| WorkerError::StatusConnect {
                endpoint: addr.clone(),
                source,
            })?;
        // Events are small and must reach the coordinator promptly.
        stream.set_nodelay(true)?;
        info!(endpoint = %addr, "status channel connected");
        Ok(Self::new(stream, worker))
    }
}

impl<W: AsyncWrite + Unpin> StatusChannel<W> {
    pub fn new(writer: W, worker: impl Into<String>) -> Self {
        Self {
            writer,
            worker: worker.into(),
        }
    }

    /// Write one event as a single newline-terminated line and flush it.
    pub async fn report(&mut self, event: StatusEvent) -> Result<()> {
        let message = StatusMessage::new(self.worker.clone(), event);
        let line = encode_line(&message)?;
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        debug!(worker = %self.worker, event = %message.event, "status reported");
        Ok(())
    }

    /// Shut the channel down. Consumes the channel so nothing can follow.
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        debug!(worker = %self.worker, "status channel closed");
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}
