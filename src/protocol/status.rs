//! Status events sent from a worker to the coordinator.
//!
//! On the wire every event is a positional JSON array:
//! `["<event_name>", "<worker>", <args>...]`. Inside the crate events are a
//! closed enum with typed fields; the array form is produced and consumed only
//! by the `Serialize`/`Deserialize` impls on [`StatusMessage`].

use std::fmt;

use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle and result events a worker can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Task channel is bound; the worker will accept tasks.
    WorkerRegister,
    DisplayStarting { address: String },
    DisplayStopping { address: String },
    TaskStarting { feature: String },
    TaskFinished { feature: String, passed: bool },
    /// Last event a worker ever sends.
    WorkerDead,
}

impl StatusEvent {
    pub const WORKER_REGISTER: &'static str = "worker_register";
    pub const DISPLAY_STARTING: &'static str = "display_starting";
    pub const DISPLAY_STOPPING: &'static str = "display_stopping";
    pub const TASK_STARTING: &'static str = "task_starting";
    pub const TASK_FINISHED: &'static str = "task_finished";
    pub const WORKER_DEAD: &'static str = "worker_dead";

    /// Wire name, the first element of the encoded array.
    pub fn name(&self) -> &'static str {
        match self {
            StatusEvent::WorkerRegister => Self::WORKER_REGISTER,
            StatusEvent::DisplayStarting { .. } => Self::DISPLAY_STARTING,
            StatusEvent::DisplayStopping { .. } => Self::DISPLAY_STOPPING,
            StatusEvent::TaskStarting { .. } => Self::TASK_STARTING,
            StatusEvent::TaskFinished { .. } => Self::TASK_FINISHED,
            StatusEvent::WorkerDead => Self::WORKER_DEAD,
        }
    }

    fn arg_count(&self) -> usize {
        match self {
            StatusEvent::WorkerRegister | StatusEvent::WorkerDead => 0,
            StatusEvent::DisplayStarting { .. }
            | StatusEvent::DisplayStopping { .. }
            | StatusEvent::TaskStarting { .. } => 1,
            StatusEvent::TaskFinished { .. } => 2,
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A [`StatusEvent`] attributed to the worker that emitted it.
///
/// `worker` is the worker's task channel address exactly as it was given on
/// the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub worker: String,
    pub event: StatusEvent,
}

impl StatusMessage {
    pub fn new(worker: impl Into<String>, event: StatusEvent) -> Self {
        Self {
            worker: worker.into(),
            event,
        }
    }
}

impl Serialize for StatusMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2 + self.event.arg_count()))?;
        seq.serialize_element(self.event.name())?;
        seq.serialize_element(&self.worker)?;
        match &self.event {
            StatusEvent::WorkerRegister | StatusEvent::WorkerDead => {}
            StatusEvent::DisplayStarting { address } | StatusEvent::DisplayStopping { address } => {
                seq.serialize_element(address)?;
            }
            StatusEvent::TaskStarting { feature } => {
                seq.serialize_element(feature)?;
            }
            StatusEvent::TaskFinished { feature, passed } => {
                seq.serialize_element(feature)?;
                seq.serialize_element(passed)?;
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for StatusMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(StatusMessageVisitor)
    }
}

const EVENT_NAMES: &[&str] = &[
    StatusEvent::WORKER_REGISTER,
    StatusEvent::DISPLAY_STARTING,
    StatusEvent::DISPLAY_STOPPING,
    StatusEvent::TASK_STARTING,
    StatusEvent::TASK_FINISHED,
    StatusEvent::WORKER_DEAD,
];

struct StatusMessageVisitor;

impl<'de> Visitor<'de> for StatusMessageVisitor {
    type Value = StatusMessage;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array [event_name, worker, args...]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let name: String = next_arg(&mut seq, 0)?;
        let worker: String = next_arg(&mut seq, 1)?;

        let event = match name.as_str() {
            StatusEvent::WORKER_REGISTER => StatusEvent::WorkerRegister,
            StatusEvent::WORKER_DEAD => StatusEvent::WorkerDead,
            StatusEvent::DISPLAY_STARTING => StatusEvent::DisplayStarting {
                address: next_arg(&mut seq, 2)?,
            },
            StatusEvent::DISPLAY_STOPPING => StatusEvent::DisplayStopping {
                address: next_arg(&mut seq, 2)?,
            },
            StatusEvent::TASK_STARTING => StatusEvent::TaskStarting {
                feature: next_arg(&mut seq, 2)?,
            },
            StatusEvent::TASK_FINISHED => StatusEvent::TaskFinished {
                feature: next_arg(&mut seq, 2)?,
                passed: next_arg(&mut seq, 3)?,
            },
            other => return Err(de::Error::unknown_variant(other, EVENT_NAMES)),
        };

        // Trailing elements are tolerated so newer workers can append arguments.
        while seq.next_element::<IgnoredAny>()?.is_some() {}

        Ok(StatusMessage { worker, event })
    }
}

fn next_arg<'de, A, T>(seq: &mut A, index: usize) -> Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::invalid_length(index, &"status event arguments"))
}
