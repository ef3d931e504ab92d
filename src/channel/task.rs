//! Inbound task channel: coordinator -> worker.
//!
//! The worker binds a listening socket at the address the coordinator chose
//! for it, accepts exactly one connection, and reads one line per task. The
//! worker only reads the next line after finishing the previous task, so a
//! slow task naturally holds back the coordinator.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::error::{Result, WorkerError};
use crate::protocol::{classify_line, Task, TaskLine};

// ---------------------------------------------------------------------------
// TaskEndpoint
// ---------------------------------------------------------------------------

/// Where a worker listens for its task connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEndpoint {
    /// Unix domain socket at a filesystem path (same-machine deployments).
    Unix(PathBuf),
    /// TCP socket address (distributed deployments).
    Tcp(SocketAddr),
}

impl TaskEndpoint {
    /// A literal `ip:port` is TCP; anything else is a socket path.
    pub fn parse(endpoint: &str) -> Self {
        match endpoint.parse::<SocketAddr>() {
            Ok(addr) => TaskEndpoint::Tcp(addr),
            Err(_) => TaskEndpoint::Unix(PathBuf::from(endpoint)),
        }
    }
}

impl fmt::Display for TaskEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEndpoint::Unix(path) => write!(f, "{}", path.display()),
            TaskEndpoint::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskListener
// ---------------------------------------------------------------------------

/// Accepted task connection, whichever transport it arrived on.
pub type TaskReader = Box<dyn AsyncRead + Send + Unpin>;

enum Bound {
    Unix(UnixListener),
    Tcp(TcpListener),
}

/// Bound task channel endpoint.
pub struct TaskListener {
    endpoint: TaskEndpoint,
    bound: Bound,
}

impl TaskListener {
    /// Bind the endpoint. A stale socket file left at a Unix path is removed
    /// first. Failure is fatal for the worker.
    pub async fn bind(endpoint: &TaskEndpoint) -> Result<Self> {
        let bind_err = |source| WorkerError::TaskBind {
            endpoint: endpoint.to_string(),
            source,
        };

        let bound = match endpoint {
            TaskEndpoint::Unix(path) => {
                remove_stale_socket(path).map_err(bind_err)?;
                Bound::Unix(UnixListener::bind(path).map_err(bind_err)?)
            }
            TaskEndpoint::Tcp(addr) => Bound::Tcp(TcpListener::bind(addr).await.map_err(bind_err)?),
        };

        let listener = Self {
            endpoint: endpoint.clone(),
            bound,
        };
        info!(endpoint = %endpoint, local_addr = ?listener.local_addr(), "task channel bound");
        Ok(listener)
    }

    /// Bound address of a TCP endpoint; resolves port `0` to the real port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.bound {
            Bound::Tcp(listener) => listener.local_addr().ok(),
            Bound::Unix(_) => None,
        }
    }

    /// Wait for the coordinator's single long-lived connection.
    pub async fn accept(&self) -> Result<TaskReader> {
        let accept_err = |source| WorkerError::TaskAccept {
            endpoint: self.endpoint.to_string(),
            source,
        };

        let reader: TaskReader = match &self.bound {
            Bound::Unix(listener) => {
                let (stream, _) = listener.accept().await.map_err(accept_err)?;
                Box::new(stream)
            }
            Bound::Tcp(listener) => {
                let (stream, peer) = listener.accept().await.map_err(accept_err)?;
                debug!(peer = %peer, "accepted task connection");
                Box::new(stream)
            }
        };

        info!(endpoint = %self.endpoint, "task channel connected");
        Ok(reader)
    }

    /// Stop listening. Same as dropping the listener.
    pub fn close(self) {
        drop(self);
    }
}

/// Dropping the listener removes the socket file of a Unix endpoint, so a
/// worker that dies on an error path leaves nothing behind.
impl Drop for TaskListener {
    fn drop(&mut self) {
        if let TaskEndpoint::Unix(path) = &self.endpoint {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove task socket");
                }
            }
        }
        debug!(endpoint = %self.endpoint, "task channel closed");
    }
}

fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale task socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// TaskStream
// ---------------------------------------------------------------------------

/// What the coordinator asked for next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskMessage {
    Task(Task),
    /// The kill sentinel.
    Kill,
    /// The coordinator closed the connection without sending the sentinel.
    Closed,
}

/// Line reader over an accepted task connection.
pub struct TaskStream<R> {
    reader: BufReader<R>,
    line: String,
    idle_retry: Duration,
    max_line_length: usize,
}

impl<R: AsyncRead + Unpin> TaskStream<R> {
    pub fn new(reader: R, config: &ChannelConfig) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
            idle_retry: config.idle_retry(),
            max_line_length: config.max_line_length,
        }
    }

    /// Block until the next task, the sentinel, or end of stream.
    ///
    /// Blank lines and transient read errors are idle reads: the stream waits
    /// `idle_retry` and reads again. A malformed task line is returned as
    /// [`WorkerError::MalformedTask`].
    pub async fn next_message(&mut self) -> Result<TaskMessage> {
        loop {
            let limit = (self.max_line_length + 1).saturating_sub(self.line.len()) as u64;
            let read = (&mut self.reader)
                .take(limit)
                .read_line(&mut self.line)
                .await;

            match read {
                Ok(0) if self.line.is_empty() => return Ok(TaskMessage::Closed),
                Ok(_) => {}
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "idle read on task channel, retrying");
                    tokio::time::sleep(self.idle_retry).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if !self.line.ends_with('\n') && self.line.len() > self.max_line_length {
                return Err(WorkerError::LineTooLong {
                    max: self.max_line_length,
                });
            }

            let line = std::mem::take(&mut self.line);
            match classify_line(&line) {
                TaskLine::Idle => {
                    debug!("blank line on task channel, waiting");
                    tokio::time::sleep(self.idle_retry).await;
                }
                TaskLine::Kill => return Ok(TaskMessage::Kill),
                TaskLine::Task(raw) => {
                    return Task::from_line(raw).map(TaskMessage::Task).map_err(|source| {
                        WorkerError::MalformedTask {
                            line: raw.trim().to_string(),
                            source,
                        }
                    });
                }
            }
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
