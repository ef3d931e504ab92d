//! Observer side of the status channel.
//!
//! Whoever reads the coordinator's inbound status stream drives an
//! [`EventListener`]: one callback per event, in the order the events were
//! received. Callbacks cannot fail; a listener that hits an error deals with
//! it itself.

pub mod dispatch;
pub mod logging;
pub mod summary;

pub use dispatch::{read_status_stream, Inbound, StatusDispatcher};
pub use logging::LoggingListener;
pub use summary::RunSummary;

/// Run and worker lifecycle callbacks. Every method defaults to a no-op so
/// implementations only override what they care about.
#[allow(unused_variables)]
pub trait EventListener {
    fn on_run_starting(&mut self) {}

    fn on_worker_register(&mut self, worker: &str) {}

    fn on_worker_dead(&mut self, worker: &str) {}

    fn on_display_starting(&mut self, worker: &str, address: &str) {}

    fn on_display_stopping(&mut self, worker: &str, address: &str) {}

    fn on_task_starting(&mut self, worker: &str, feature: &str) {}

    fn on_task_finished(&mut self, worker: &str, feature: &str, passed: bool) {}

    /// Coordinator-level; workers never report this.
    fn on_run_finished(&mut self, any_failed: bool) {}

    fn on_run_interrupted(&mut self) {}
}
