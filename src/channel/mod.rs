//! Socket transports for the two worker channels.

pub mod status;
pub mod task;

pub use status::{resolve_status_endpoint, StatusChannel};
pub use task::{TaskEndpoint, TaskListener, TaskMessage, TaskReader, TaskStream};
