//! Error types for the worker protocol.
//!
//! Every variant here is fatal for the worker process: the caller propagates it
//! out of `main` and the process exits non-zero without reporting
//! `worker_dead`. Engine failures are not errors; they surface as
//! `task_finished(.., false)`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to connect status channel to {endpoint}: {source}")]
    StatusConnect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind task channel at {endpoint}: {source}")]
    TaskBind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept task channel connection on {endpoint}: {source}")]
    TaskAccept {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed task message {line:?}: {source}")]
    MalformedTask {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("task channel line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("worker already registered")]
    AlreadyRegistered,

    #[error("worker is not registered")]
    NotRegistered,

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("display resource failed: {0}")]
    Display(String),

    #[error("failed to encode status event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;
