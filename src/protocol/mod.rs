//! Wire protocol between coordinator and worker.
//!
//! Two one-directional channels, both newline-delimited JSON:
//! - task channel (coordinator -> worker): one [`Task`] object per line, then
//!   the [`SENTINEL`] line.
//! - status channel (worker -> coordinator): one [`StatusMessage`] array per
//!   line.

pub mod status;
pub mod task;
pub mod wire;

pub use status::{StatusEvent, StatusMessage};
pub use task::{sanitize_feature, Artifacts, Task};
pub use wire::{
    classify_line, encode_line, LineFrame, LineFrameCodec, TaskLine, MAX_LINE_LENGTH, SENTINEL,
};
