//! Pass/fail tally for a whole run.

use super::EventListener;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub workers_registered: usize,
    pub workers_dead: usize,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any task reported `passed == false`.
    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }

    pub fn tasks_finished(&self) -> usize {
        self.passed + self.failed
    }
}

impl EventListener for RunSummary {
    fn on_worker_register(&mut self, _worker: &str) {
        self.workers_registered += 1;
    }

    fn on_worker_dead(&mut self, _worker: &str) {
        self.workers_dead += 1;
    }

    fn on_task_finished(&mut self, _worker: &str, _feature: &str, passed: bool) {
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }

    fn on_run_interrupted(&mut self) {
        self.interrupted = true;
    }
}
