//! TOML configuration for a testfork worker.
//!
//! Every field has a compiled-in default so a worker runs with no config file
//! at all. The file location can be given explicitly, through the
//! `TESTFORK_CONFIG` environment variable, or at the standard system path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::MAX_LINE_LENGTH;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TESTFORK_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/testfork/testfork.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the worker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WorkerConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded worker configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve the configuration, in order:
    /// 1. `explicit` (from `--config`); an unreadable file here is an error.
    /// 2. The path in `TESTFORK_CONFIG`.
    /// 3. [`SYSTEM_CONFIG_PATH`].
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TESTFORK_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The external test runner invoked once per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program to execute (looked up on `PATH`).
    pub program: String,
    /// Arguments placed before the per-task arguments.
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "cucumber".to_string(),
            args: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Pause before re-reading after an idle (blank or interrupted) read.
    pub idle_retry_ms: u64,
    /// Longest accepted task channel line, in bytes.
    pub max_line_length: usize,
}

impl ChannelConfig {
    pub fn idle_retry(&self) -> Duration {
        Duration::from_millis(self.idle_retry_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            idle_retry_ms: 100,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Virtual display server used when the worker is started with display
/// management enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// X server binary.
    pub command: String,
    /// Arguments appended after the `:<n>` display argument.
    pub args: Vec<String>,
    /// First display number tried.
    pub base_display: u32,
    /// How many display numbers to try before giving up.
    pub max_attempts: u32,
    /// Time allowed for the server socket to appear.
    pub startup_timeout_ms: u64,
    /// Grace period for a non-forced stop before the server is killed.
    pub grace_period_ms: u64,
    /// Directory holding `.X<n>-lock` files.
    pub lock_dir: PathBuf,
    /// Directory holding the `X<n>` sockets.
    pub socket_dir: PathBuf,
}

impl DisplayConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            command: "Xvfb".to_string(),
            args: vec![
                "-screen".to_string(),
                "0".to_string(),
                "1280x1024x24".to_string(),
                "-nolisten".to_string(),
                "tcp".to_string(),
            ],
            base_display: 99,
            max_attempts: 100,
            startup_timeout_ms: 10_000,
            grace_period_ms: 5_000,
            lock_dir: PathBuf::from("/tmp"),
            socket_dir: PathBuf::from("/tmp/.X11-unix"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.engine.program, "cucumber");
        assert!(config.engine.args.is_empty());
        assert_eq!(config.channel.idle_retry(), Duration::from_millis(100));
        assert_eq!(config.channel.max_line_length, MAX_LINE_LENGTH);
        assert_eq!(config.display.command, "Xvfb");
        assert_eq!(config.display.base_display, 99);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = WorkerConfig::from_toml(
            r#"
            [engine]
            program = "bundle"
            args = ["exec", "cucumber"]

            [display]
            base_display = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.program, "bundle");
        assert_eq!(config.engine.args, vec!["exec", "cucumber"]);
        assert_eq!(config.display.base_display, 20);
        assert_eq!(config.display.command, "Xvfb");
        assert_eq!(config.channel.idle_retry_ms, 100);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(WorkerConfig::from_toml("[engine]\nprogram = 3").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testfork.toml");
        std::fs::write(&path, "[logging]\njson = true\n").unwrap();

        let config = WorkerConfig::resolve(Some(&path)).unwrap();
        assert!(config.logging.json);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WorkerConfig::resolve(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
