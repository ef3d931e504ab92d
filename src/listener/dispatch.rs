//! Decoding inbound status streams and driving listeners.
//!
//! Each worker connection is read by [`read_status_stream`], which forwards
//! decoded messages over a channel. A single [`StatusDispatcher`] consumes that
//! channel, so callbacks run one at a time in receive order no matter how many
//! workers are connected.

use std::collections::HashSet;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use super::{EventListener, RunSummary};
use crate::protocol::{LineFrame, LineFrameCodec, StatusEvent, StatusMessage};

/// Item forwarded from a connection reader to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Status(StatusMessage),
    /// The connection ended. `worker` is the identity last seen on it.
    Closed { worker: Option<String> },
}

/// Read one worker's status connection until it closes.
///
/// Malformed, overlong and non-UTF-8 lines are logged and skipped; only a
/// transport error ends the stream early. Always finishes with
/// [`Inbound::Closed`]. Returns early if the dispatcher has gone away.
pub async fn read_status_stream<R>(reader: R, max_line_length: usize, tx: mpsc::Sender<Inbound>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LineFrameCodec::new(max_line_length));
    let mut worker = None;

    while let Some(item) = lines.next().await {
        let line = match item {
            Ok(LineFrame::Line(line)) => line,
            Ok(LineFrame::Skipped(reason)) => {
                warn!(%reason, ?worker, "skipping unreadable status line");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "status stream read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<StatusMessage>(&line) {
            Ok(msg) => {
                worker = Some(msg.worker.clone());
                if tx.send(Inbound::Status(msg)).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, line = %line, "skipping malformed status line"),
        }
    }

    let _ = tx.send(Inbound::Closed { worker }).await;
}

/// Routes status messages to a listener and keeps the run tally.
pub struct StatusDispatcher<L> {
    listener: L,
    summary: RunSummary,
    live: HashSet<String>,
    dead: HashSet<String>,
    abnormal: Vec<String>,
}

impl<L: EventListener> StatusDispatcher<L> {
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            summary: RunSummary::new(),
            live: HashSet::new(),
            dead: HashSet::new(),
            abnormal: Vec::new(),
        }
    }

    pub fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Status(msg) => self.dispatch(&msg),
            Inbound::Closed { worker } => self.connection_closed(worker.as_deref()),
        }
    }

    /// Invoke the callback matching one status message.
    pub fn dispatch(&mut self, msg: &StatusMessage) {
        let worker = msg.worker.as_str();
        if self.dead.contains(worker) {
            warn!(worker, event = %msg.event, "event received after worker_dead");
        }

        match &msg.event {
            StatusEvent::WorkerRegister => {
                self.live.insert(worker.to_string());
                self.summary.on_worker_register(worker);
                self.listener.on_worker_register(worker);
            }
            StatusEvent::DisplayStarting { address } => {
                self.listener.on_display_starting(worker, address);
            }
            StatusEvent::DisplayStopping { address } => {
                self.listener.on_display_stopping(worker, address);
            }
            StatusEvent::TaskStarting { feature } => {
                self.listener.on_task_starting(worker, feature);
            }
            StatusEvent::TaskFinished { feature, passed } => {
                self.summary.on_task_finished(worker, feature, *passed);
                self.listener.on_task_finished(worker, feature, *passed);
            }
            StatusEvent::WorkerDead => {
                self.live.remove(worker);
                self.dead.insert(worker.to_string());
                self.summary.on_worker_dead(worker);
                self.listener.on_worker_dead(worker);
            }
        }
    }

    /// A connection closed; a registered worker without `worker_dead` died
    /// abnormally.
    fn connection_closed(&mut self, worker: Option<&str>) {
        let Some(worker) = worker else {
            debug!("status connection closed before any event");
            return;
        };
        if self.live.remove(worker) {
            warn!(worker, "worker connection closed without worker_dead");
            self.abnormal.push(worker.to_string());
        }
    }

    pub fn run_starting(&mut self) {
        self.listener.on_run_starting();
    }

    pub fn run_interrupted(&mut self) {
        self.summary.on_run_interrupted();
        self.listener.on_run_interrupted();
    }

    /// Report the end of the run. Abnormal worker deaths count as failures.
    pub fn run_finished(&mut self) -> bool {
        let any_failed = self.summary.any_failed() || !self.abnormal.is_empty();
        self.listener.on_run_finished(any_failed);
        any_failed
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Workers whose connection closed without `worker_dead`, in order.
    pub fn abnormal_deaths(&self) -> &[String] {
        &self.abnormal
    }

    /// Workers that registered and have neither died nor disconnected.
    pub fn live_workers(&self) -> usize {
        self.live.len()
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }
}
