//! Console reporter: one timestamped line per event.

use std::io::{self, Stdout, Write};

use chrono::Local;
use tracing::debug;

use super::EventListener;

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Renders every callback as a fixed-width log line on `W`.
///
/// ```text
/// I, [2026-10-16 09:12:01#4242]  INFO -- : [    worker  /tmp/w1   ] starting: features/login.feature
/// ```
///
/// Write errors are swallowed.
pub struct LoggingListener<W = Stdout> {
    io: W,
}

impl LoggingListener<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> LoggingListener<W> {
    pub fn new(io: W) -> Self {
        Self { io }
    }

    pub fn get_ref(&self) -> &W {
        &self.io
    }

    pub fn into_inner(self) -> W {
        self.io
    }

    fn info(&mut self, message: &str) {
        let line = format!(
            "I, [{}#{}]  INFO -- : {}",
            Local::now().format(TIME_FORMAT),
            std::process::id(),
            message
        );
        if let Err(e) = writeln!(self.io, "{line}").and_then(|_| self.io.flush()) {
            debug!(error = %e, "logging listener write failed");
        }
    }

    fn worker_line(&mut self, worker: &str, label: &str, detail: &str) {
        let message = format!("[    worker  {worker:<3}   ] {label}: {detail}");
        self.info(&message);
    }
}

impl<W: Write> EventListener for LoggingListener<W> {
    fn on_run_starting(&mut self) {
        self.info("[    run           ] starting");
    }

    fn on_worker_register(&mut self, worker: &str) {
        self.worker_line(worker, "register", worker);
    }

    fn on_worker_dead(&mut self, worker: &str) {
        self.worker_line(worker, "dead    ", worker);
    }

    fn on_display_starting(&mut self, worker: &str, address: &str) {
        self.worker_line(worker, "disp on ", address);
    }

    fn on_display_stopping(&mut self, worker: &str, address: &str) {
        self.worker_line(worker, "disp off", address);
    }

    fn on_task_starting(&mut self, worker: &str, feature: &str) {
        self.worker_line(worker, "starting", feature);
    }

    fn on_task_finished(&mut self, worker: &str, feature: &str, passed: bool) {
        let status = format!("{:<8}", status_string(passed));
        self.worker_line(worker, &status, feature);
    }

    fn on_run_finished(&mut self, any_failed: bool) {
        let message = format!("[    run           ] finished, {}", status_string(!any_failed));
        self.info(&message);
    }

    fn on_run_interrupted(&mut self) {
        if let Err(e) = writeln!(self.io) {
            debug!(error = %e, "logging listener write failed");
        }
        self.info("[    run           ] interrupted - please wait");
    }
}

fn status_string(passed: bool) -> &'static str {
    if passed {
        "passed"
    } else {
        "failed"
    }
}
