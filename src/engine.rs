//! Execution engine adapter.
//!
//! The engine is an external test runner. Each task spawns it once as a child
//! process with stdout/stderr redirected into the task's artifact files; the
//! exit status decides pass/fail.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::protocol::Task;

// ---------------------------------------------------------------------------
// Invocation / outcome
// ---------------------------------------------------------------------------

/// Everything needed to run the engine for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub feature: String,
    /// Per-task arguments, see [`Task::engine_args`].
    pub args: Vec<String>,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    /// X display the engine should draw on, if the worker manages one.
    pub display: Option<String>,
}

impl Invocation {
    pub fn for_task(task: &Task, display: Option<&str>) -> Self {
        let artifacts = task.artifacts();
        Self {
            feature: task.feature.clone(),
            args: task.engine_args(),
            stdout: artifacts.stdout,
            stderr: artifacts.stderr,
            display: display.map(str::to_string),
        }
    }
}

/// Outcome of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Passed,
    /// Non-zero exit, or terminated by a signal (`exit_code` is `None`).
    Failed { exit_code: Option<i32> },
    /// The engine could not be started at all.
    SpawnFailed(String),
}

impl EngineOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, EngineOutcome::Passed)
    }
}

/// Something that can run one task to completion.
///
/// Implementations never fail: anything that goes wrong is a failed outcome.
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> EngineOutcome;
}

// ---------------------------------------------------------------------------
// CommandEngine
// ---------------------------------------------------------------------------

/// Runs a configured program as a child process per task.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    /// Placed before the per-task arguments.
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    fn command(&self, invocation: &Invocation, stdout: File, stderr: File) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        if let Some(display) = &invocation.display {
            cmd.env("DISPLAY", display);
        }
        cmd
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for CommandEngine {
    async fn execute(&self, invocation: &Invocation) -> EngineOutcome {
        let stdout = match File::create(&invocation.stdout) {
            Ok(f) => f,
            Err(e) => return spawn_failed(invocation, format!("cannot create stdout file: {e}")),
        };
        let stderr = match File::create(&invocation.stderr) {
            Ok(f) => f,
            Err(e) => return spawn_failed(invocation, format!("cannot create stderr file: {e}")),
        };
        let mut stderr_note = stderr.try_clone().ok();

        info!(
            program = %self.program,
            feature = %invocation.feature,
            args = ?invocation.args,
            display = ?invocation.display,
            "starting engine"
        );

        let mut child = match self.command(invocation, stdout, stderr).spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to spawn engine '{}': {e}", self.program);
                if let Some(file) = stderr_note.as_mut() {
                    let _ = writeln!(file, "{message}");
                }
                return spawn_failed(invocation, message);
            }
        };
        drop(stderr_note);

        match child.wait().await {
            Ok(status) if status.success() => {
                debug!(feature = %invocation.feature, "engine passed");
                EngineOutcome::Passed
            }
            Ok(status) => {
                info!(
                    feature = %invocation.feature,
                    exit_code = ?status.code(),
                    "engine reported failure"
                );
                EngineOutcome::Failed {
                    exit_code: status.code(),
                }
            }
            Err(e) => {
                warn!(feature = %invocation.feature, error = %e, "failed to wait for engine");
                EngineOutcome::Failed { exit_code: None }
            }
        }
    }
}

fn spawn_failed(invocation: &Invocation, message: String) -> EngineOutcome {
    error!(feature = %invocation.feature, error = %message, "engine could not be started");
    EngineOutcome::SpawnFailed(message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
