//! Worker lifecycle state machine.
//!
//! ```text
//! Created --register--> Registered --run--> Idle <--> Executing
//!                                            |
//!                                    sentinel / closed
//!                                            v
//!                                           Dead --close--> (gone)
//! ```
//!
//! A worker runs one task at a time on a single control flow. It reports
//! `worker_register` only after the task channel is bound and the display (if
//! any) is up, so the coordinator never sends work to a worker that is not
//! ready. `worker_dead` is always the last event; after it the worker can
//! only be closed.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::channel::{StatusChannel, TaskEndpoint, TaskListener, TaskMessage, TaskStream};
use crate::config::ChannelConfig;
use crate::display::DisplayResource;
use crate::engine::{ExecutionEngine, Invocation};
use crate::error::{Result, WorkerError};
use crate::protocol::{StatusEvent, Task};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Status channel open, task channel not yet bound.
    Created,
    /// Task channel bound, `worker_register` sent.
    Registered,
    /// Waiting for the next task line.
    Idle,
    Executing,
    /// `worker_dead` sent.
    Dead,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Created => write!(f, "created"),
            WorkerState::Registered => write!(f, "registered"),
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Executing => write!(f, "executing"),
            WorkerState::Dead => write!(f, "dead"),
        }
    }
}

/// Tally of one worker's run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub executed: usize,
    pub failed: usize,
}

impl RunReport {
    fn record(&mut self, passed: bool) {
        self.executed += 1;
        if !passed {
            self.failed += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Worker<W = TcpStream> {
    /// Task endpoint exactly as given; stamped on every status event.
    identity: String,
    endpoint: TaskEndpoint,
    status: StatusChannel<W>,
    engine: Box<dyn ExecutionEngine>,
    display: Option<Box<dyn DisplayResource>>,
    display_address: Option<String>,
    listener: Option<TaskListener>,
    channel: ChannelConfig,
    state: WorkerState,
}

impl Worker<TcpStream> {
    /// Open the status channel to the coordinator. Failure is fatal.
    pub async fn connect(
        status_endpoint: &str,
        task_endpoint: &str,
        engine: Box<dyn ExecutionEngine>,
    ) -> Result<Self> {
        let status = StatusChannel::connect(status_endpoint, task_endpoint).await?;
        Ok(Self::new(status, task_endpoint, engine))
    }
}

impl<W: AsyncWrite + Unpin + Send> Worker<W> {
    /// Build a worker over an already-open status channel.
    pub fn new(status: StatusChannel<W>, task_endpoint: &str, engine: Box<dyn ExecutionEngine>) -> Self {
        Self {
            identity: task_endpoint.to_string(),
            endpoint: TaskEndpoint::parse(task_endpoint),
            status,
            engine,
            display: None,
            display_address: None,
            listener: None,
            channel: ChannelConfig::default(),
            state: WorkerState::Created,
        }
    }

    /// Manage a display for the engine across the worker's lifetime.
    pub fn with_display(mut self, display: Box<dyn DisplayResource>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_channel_config(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Address of the running display, if one was started.
    pub fn display_address(&self) -> Option<&str> {
        self.display_address.as_deref()
    }

    /// `Created -> Registered`: bind the task channel, start the display,
    /// then announce readiness. Happens once.
    pub async fn register(&mut self) -> Result<()> {
        if self.state != WorkerState::Created {
            return Err(WorkerError::AlreadyRegistered);
        }

        self.listener = Some(TaskListener::bind(&self.endpoint).await?);

        if let Some(display) = self.display.as_mut() {
            let address = display.start().await?;
            info!(worker = %self.identity, display = %address, "display ready");
            self.display_address = Some(address.clone());
            self.status
                .report(StatusEvent::DisplayStarting { address })
                .await?;
        }

        self.status.report(StatusEvent::WorkerRegister).await?;
        self.state = WorkerState::Registered;
        info!(worker = %self.identity, "worker registered");
        Ok(())
    }

    /// `Registered -> Idle`: accept the coordinator's connection and process
    /// tasks until the sentinel (or end of stream) moves the worker to `Dead`.
    pub async fn run(&mut self) -> Result<RunReport> {
        if self.state != WorkerState::Registered {
            return Err(WorkerError::NotRegistered);
        }
        let reader = match self.listener.as_ref() {
            Some(listener) => listener.accept().await?,
            None => return Err(WorkerError::NotRegistered),
        };
        self.serve(reader).await
    }

    async fn serve<R: AsyncRead + Unpin>(&mut self, reader: R) -> Result<RunReport> {
        let mut tasks = TaskStream::new(reader, &self.channel);
        let mut report = RunReport::default();
        self.state = WorkerState::Idle;

        loop {
            match tasks.next_message().await? {
                TaskMessage::Task(task) => {
                    let passed = self.execute(&task).await?;
                    report.record(passed);
                }
                TaskMessage::Kill => {
                    info!(worker = %self.identity, "kill sentinel received");
                    break;
                }
                TaskMessage::Closed => {
                    warn!(
                        worker = %self.identity,
                        "task channel closed without kill sentinel, shutting down"
                    );
                    break;
                }
            }
        }

        self.shutdown().await?;
        Ok(report)
    }

    /// `Idle -> Executing -> Idle` for one task.
    async fn execute(&mut self, task: &Task) -> Result<bool> {
        self.state = WorkerState::Executing;
        self.status
            .report(StatusEvent::TaskStarting {
                feature: task.feature.clone(),
            })
            .await?;

        let artifacts = task.artifacts();
        std::fs::create_dir_all(&artifacts.dir).map_err(|source| WorkerError::OutputDir {
            path: artifacts.dir.clone(),
            source,
        })?;

        let invocation = Invocation::for_task(task, self.display_address.as_deref());
        let outcome = self.engine.execute(&invocation).await;
        let passed = outcome.passed();
        debug!(worker = %self.identity, feature = %task.feature, ?outcome, "task finished");

        self.status
            .report(StatusEvent::TaskFinished {
                feature: task.feature.clone(),
                passed,
            })
            .await?;
        self.state = WorkerState::Idle;
        Ok(passed)
    }

    /// `Idle -> Dead`: stop the display and send the final event.
    async fn shutdown(&mut self) -> Result<()> {
        if let Some(display) = self.display.as_mut() {
            if let Some(address) = self.display_address.take() {
                if let Err(e) = display.stop(true).await {
                    warn!(worker = %self.identity, error = %e, "failed to stop display");
                }
                self.status
                    .report(StatusEvent::DisplayStopping { address })
                    .await?;
            }
        }

        self.status.report(StatusEvent::WorkerDead).await?;
        self.state = WorkerState::Dead;
        info!(worker = %self.identity, "worker dead");
        Ok(())
    }

    /// Close the task listener, then the status channel.
    pub async fn close(self) -> Result<()> {
        if let Some(listener) = self.listener {
            listener.close();
        }
        self.status.close().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::engine::EngineOutcome;
    use crate::protocol::StatusMessage;
    use tokio_test::io::Builder;

    /// Engine that records invocations and fails features containing "fail".
    #[derive(Clone, Default)]
    struct RecordingEngine {
        calls: Arc<Mutex<Vec<Invocation>>>,
    }

    #[async_trait::async_trait]
    impl ExecutionEngine for RecordingEngine {
        async fn execute(&self, invocation: &Invocation) -> EngineOutcome {
            self.calls.lock().unwrap().push(invocation.clone());
            if invocation.feature.contains("fail") {
                EngineOutcome::Failed { exit_code: Some(1) }
            } else {
                EngineOutcome::Passed
            }
        }
    }

    #[derive(Clone, Default)]
    struct FakeDisplay {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl DisplayResource for FakeDisplay {
        async fn start(&mut self) -> Result<String> {
            self.log.lock().unwrap().push("start".into());
            Ok(":42".into())
        }

        async fn stop(&mut self, force: bool) -> Result<()> {
            self.log.lock().unwrap().push(format!("stop force={force}"));
            Ok(())
        }
    }

    fn fast() -> ChannelConfig {
        ChannelConfig {
            idle_retry_ms: 1,
            ..ChannelConfig::default()
        }
    }

    fn worker(engine: RecordingEngine) -> Worker<Vec<u8>> {
        Worker::new(StatusChannel::new(Vec::new(), "/tmp/w1"), "/tmp/w1", Box::new(engine))
            .with_channel_config(fast())
    }

    fn events(worker: &Worker<Vec<u8>>) -> Vec<StatusEvent> {
        String::from_utf8(worker.status.get_ref().clone())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str::<StatusMessage>(line).unwrap())
            .inspect(|msg| assert_eq!(msg.worker, "/tmp/w1"))
            .map(|msg| msg.event)
            .collect()
    }

    fn task_line(feature: &str, out: &std::path::Path) -> Vec<u8> {
        format!(
            "{{\"feature\":\"{feature}\",\"format\":\"pretty\",\"out\":\"{}\",\"extra_args\":[]}}\n",
            out.display()
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_tasks_then_kill_event_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecordingEngine::default();
        let mut worker = worker(engine.clone());
        worker.state = WorkerState::Registered;

        let mock = Builder::new()
            .read(&task_line("f1", dir.path()))
            .read(&task_line("f2_fail", dir.path()))
            .read(b"__KILL__\n")
            .build();
        let report = worker.serve(mock).await.unwrap();

        assert_eq!(report, RunReport { executed: 2, failed: 1 });
        assert_eq!(worker.state(), WorkerState::Dead);
        assert_eq!(
            events(&worker),
            vec![
                StatusEvent::TaskStarting { feature: "f1".into() },
                StatusEvent::TaskFinished { feature: "f1".into(), passed: true },
                StatusEvent::TaskStarting { feature: "f2_fail".into() },
                StatusEvent::TaskFinished { feature: "f2_fail".into(), passed: false },
                StatusEvent::WorkerDead,
            ]
        );

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].display, None);
        assert_eq!(calls[0].stdout, dir.path().join("f1.stdout"));
    }

    #[tokio::test]
    async fn test_output_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let mut worker = worker(RecordingEngine::default());

        let mock = Builder::new()
            .read(&task_line("f1", &out))
            .read(&task_line("f1", &out))
            .read(b"__KILL__\n")
            .build();
        worker.serve(mock).await.unwrap();
        assert!(out.is_dir());
    }

    #[tokio::test]
    async fn test_closed_connection_acts_as_sentinel() {
        let mut worker = worker(RecordingEngine::default());
        let mock = Builder::new().read(b"\n").build();

        let report = worker.serve(mock).await.unwrap();
        assert_eq!(report, RunReport::default());
        assert_eq!(events(&worker), vec![StatusEvent::WorkerDead]);
    }

    #[tokio::test]
    async fn test_malformed_task_is_fatal_without_worker_dead() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = worker(RecordingEngine::default());
        let mock = Builder::new()
            .read(&task_line("f1", dir.path()))
            .read(b"{\"feature\": 12}\n")
            .build();

        let err = worker.serve(mock).await.unwrap_err();
        assert!(matches!(err, WorkerError::MalformedTask { .. }));
        let events = events(&worker);
        assert_eq!(events.len(), 2);
        assert!(!events.contains(&StatusEvent::WorkerDead));
    }

    #[tokio::test]
    async fn test_display_lifecycle_and_address() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecordingEngine::default();
        let display = FakeDisplay::default();
        let socket = dir.path().join("w.sock");
        let identity = socket.to_str().unwrap().to_string();

        let mut worker = Worker::new(
            StatusChannel::new(Vec::new(), identity.clone()),
            &identity,
            Box::new(engine.clone()),
        )
        .with_display(Box::new(display.clone()))
        .with_channel_config(fast());

        worker.register().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Registered);
        assert_eq!(worker.display_address(), Some(":42"));
        assert!(matches!(
            worker.register().await,
            Err(WorkerError::AlreadyRegistered)
        ));

        let mock = Builder::new()
            .read(&task_line("f1", dir.path()))
            .read(b"  __KILL__  \n")
            .build();
        worker.serve(mock).await.unwrap();

        let written = String::from_utf8(worker.status.get_ref().clone()).unwrap();
        let names: Vec<String> = written
            .lines()
            .map(|l| serde_json::from_str::<StatusMessage>(l).unwrap().event.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "display_starting",
                "worker_register",
                "task_starting",
                "task_finished",
                "display_stopping",
                "worker_dead",
            ]
        );
        assert_eq!(
            engine.calls.lock().unwrap()[0].display.as_deref(),
            Some(":42")
        );
        assert_eq!(
            *display.log.lock().unwrap(),
            vec!["start".to_string(), "stop force=true".to_string()]
        );
        assert!(std::env::var("DISPLAY").map_or(true, |d| d != ":42"));

        worker.close().await.unwrap();
        assert!(!socket.exists());
    }

    struct BrokenDisplay;

    #[async_trait::async_trait]
    impl DisplayResource for BrokenDisplay {
        async fn start(&mut self) -> Result<String> {
            Err(WorkerError::Display("no display".into()))
        }

        async fn stop(&mut self, _force: bool) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_register_leaves_no_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("w.sock");
        let identity = socket.to_str().unwrap().to_string();

        let mut worker = Worker::new(
            StatusChannel::new(Vec::new(), identity.clone()),
            &identity,
            Box::new(RecordingEngine::default()),
        )
        .with_display(Box::new(BrokenDisplay));

        assert!(matches!(worker.register().await, Err(WorkerError::Display(_))));
        assert_eq!(worker.state(), WorkerState::Created);
        assert!(socket.exists());

        drop(worker);
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_run_before_register_is_error() {
        let mut worker = worker(RecordingEngine::default());
        assert!(matches!(worker.run().await, Err(WorkerError::NotRegistered)));
    }
}
