//! Virtual display management for headless graphical test runs.
//!
//! A worker started with display management enabled starts one X virtual
//! framebuffer before registering and stops it after the kill sentinel. The
//! display address is handed to every engine invocation explicitly; the
//! worker's own environment is never modified.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::DisplayConfig;
use crate::error::{Result, WorkerError};

/// Interval between checks for the display socket during startup.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A display the engine can draw on.
#[async_trait::async_trait]
pub trait DisplayResource: Send {
    /// Provision the display and return its address (e.g. `:99`).
    async fn start(&mut self) -> Result<String>;

    /// Tear the display down. With `force` the server is killed without
    /// waiting for clients to disconnect.
    async fn stop(&mut self, force: bool) -> Result<()>;
}

// ---------------------------------------------------------------------------
// VirtualDisplay
// ---------------------------------------------------------------------------

/// `Xvfb`-style server on the first free display number.
pub struct VirtualDisplay {
    config: DisplayConfig,
    running: Option<(u32, Child)>,
}

impl VirtualDisplay {
    pub fn new(config: DisplayConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    fn lock_file(&self, number: u32) -> PathBuf {
        self.config.lock_dir.join(format!(".X{number}-lock"))
    }

    fn socket_file(&self, number: u32) -> PathBuf {
        self.config.socket_dir.join(format!("X{number}"))
    }

    /// Display numbers to try, skipping ones whose lock file exists.
    fn candidates(&self) -> impl Iterator<Item = u32> + '_ {
        let first = self.config.base_display;
        (first..first.saturating_add(self.config.max_attempts))
            .filter(move |n| !self.lock_file(*n).exists())
    }

    fn spawn(&self, number: u32) -> std::io::Result<Child> {
        Command::new(&self.config.command)
            .arg(format!(":{number}"))
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Wait for the server socket. `Ok(false)` means the server exited first.
async fn wait_ready(socket: &Path, child: &mut Child, timeout: Duration) -> Result<bool> {
    let ready = async {
        loop {
            if socket.exists() {
                return Ok(true);
            }
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(exit_code = ?status.code(), "display server exited during startup");
                    return Ok(false);
                }
                Ok(None) => {}
                Err(e) => return Err(WorkerError::Io(e)),
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
    };

    match tokio::time::timeout(timeout, ready).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Display(format!(
            "{} not ready after {timeout:?}",
            socket.display()
        ))),
    }
}

#[async_trait::async_trait]
impl DisplayResource for VirtualDisplay {
    async fn start(&mut self) -> Result<String> {
        if let Some((number, _)) = &self.running {
            return Ok(format!(":{number}"));
        }

        let numbers: Vec<u32> = self.candidates().collect();
        for number in numbers {
            let mut child = self.spawn(number).map_err(|e| {
                WorkerError::Display(format!("failed to spawn {}: {e}", self.config.command))
            })?;

            let socket = self.socket_file(number);
            match wait_ready(&socket, &mut child, self.config.startup_timeout()).await {
                Ok(true) => {
                    let address = format!(":{number}");
                    info!(display = %address, pid = ?child.id(), "virtual display started");
                    self.running = Some((number, child));
                    return Ok(address);
                }
                Ok(false) => continue,
                Err(e) => {
                    let _ = child.kill().await;
                    return Err(e);
                }
            }
        }

        Err(WorkerError::Display(format!(
            "no free display number in {}..{}",
            self.config.base_display,
            self.config.base_display.saturating_add(self.config.max_attempts)
        )))
    }

    async fn stop(&mut self, force: bool) -> Result<()> {
        let Some((number, mut child)) = self.running.take() else {
            return Ok(());
        };

        if force {
            child.kill().await.map_err(|e| {
                WorkerError::Display(format!("failed to kill display :{number}: {e}"))
            })?;
        } else {
            terminate_child(&mut child, self.config.grace_period()).await;
        }

        info!(display = number, force, "virtual display stopped");
        Ok(())
    }
}

/// Send SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate_child(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is our own child, which has not been reaped yet.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(exit_code = status.code(), "display server exited after SIGTERM");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "error waiting for display server after SIGTERM");
        }
        Err(_) => {
            warn!("display server did not exit after SIGTERM, sending SIGKILL");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to SIGKILL display server");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Fake X server script: creates the socket file for `:<n>` and sleeps.
    fn fake_config(dir: &Path) -> DisplayConfig {
        let script = dir.join("fake-xvfb");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ntouch \"{}/X${{1#:}}\"\nexec sleep 30\n", dir.display()),
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        DisplayConfig {
            command: script.to_string_lossy().into_owned(),
            args: vec![],
            base_display: 40,
            max_attempts: 5,
            startup_timeout_ms: 5_000,
            grace_period_ms: 1_000,
            lock_dir: dir.to_path_buf(),
            socket_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_start_skips_locked_numbers_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".X40-lock"), b"").unwrap();
        let mut display = VirtualDisplay::new(fake_config(dir.path()));

        let address = display.start().await.unwrap();
        assert_eq!(address, ":41");
        // Starting again reports the running display.
        assert_eq!(display.start().await.unwrap(), ":41");

        display.stop(true).await.unwrap();
        // Stopping twice is harmless.
        display.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_graceful_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = VirtualDisplay::new(fake_config(dir.path()));
        assert_eq!(display.start().await.unwrap(), ":40");
        display.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary_is_display_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = VirtualDisplay::new(DisplayConfig {
            command: "/nonexistent/Xvfb".into(),
            lock_dir: dir.path().to_path_buf(),
            socket_dir: dir.path().to_path_buf(),
            ..DisplayConfig::default()
        });
        assert!(matches!(
            display.start().await,
            Err(WorkerError::Display(_))
        ));
    }

    #[tokio::test]
    async fn test_all_numbers_locked() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_config(dir.path());
        config.max_attempts = 2;
        std::fs::write(dir.path().join(".X40-lock"), b"").unwrap();
        std::fs::write(dir.path().join(".X41-lock"), b"").unwrap();

        let err = VirtualDisplay::new(config).start().await.unwrap_err();
        assert!(err.to_string().contains("no free display number"));
    }
}
