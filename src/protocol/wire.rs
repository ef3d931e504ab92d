//! Newline-delimited framing shared by the task and status channels.
//!
//! Each frame is one UTF-8 line terminated by `\n` (a trailing `\r` is
//! stripped). Line length is bounded so a coordinator bug cannot make a
//! worker buffer without limit.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::error::{Result, WorkerError};

/// Default maximum line length: 1 MB.
pub const MAX_LINE_LENGTH: usize = 1_048_576;

/// Task channel token asking the worker to shut down.
pub const SENTINEL: &str = "__KILL__";

/// One frame read off a line-delimited stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineFrame {
    Line(String),
    /// The line was too long or not UTF-8 and has been consumed.
    Skipped(String),
}

/// Newline codec that turns a bad line into [`LineFrame::Skipped`] instead of
/// an error, so one bad line does not end the stream. Only transport errors
/// are returned as errors.
#[derive(Debug)]
pub struct LineFrameCodec {
    inner: LinesCodec,
}

impl LineFrameCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_length),
        }
    }
}

impl Default for LineFrameCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

impl Decoder for LineFrameCodec {
    type Item = LineFrame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<LineFrame>> {
        recover(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<LineFrame>> {
        recover(self.inner.decode_eof(buf))
    }
}

// `LinesCodec` consumes a non-UTF-8 line before failing and discards the rest
// of an overlong line on the next call, so both are safe to skip.
fn recover(result: Result<Option<String>, LinesCodecError>) -> io::Result<Option<LineFrame>> {
    match result {
        Ok(line) => Ok(line.map(LineFrame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => {
            Ok(Some(LineFrame::Skipped("line exceeds maximum length".to_string())))
        }
        Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
            Ok(Some(LineFrame::Skipped(e.to_string())))
        }
        Err(LinesCodecError::Io(e)) => Err(e),
    }
}

/// Serialize a message to JSON and terminate it with a newline.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<Bytes> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_LINE_LENGTH {
        return Err(WorkerError::LineTooLong {
            max: MAX_LINE_LENGTH,
        });
    }

    let mut buf = BytesMut::with_capacity(json.len() + 1);
    buf.extend_from_slice(&json);
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// What a single task channel line asks the worker to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLine<'a> {
    /// Blank line; keep waiting.
    Idle,
    Kill,
    /// Candidate task JSON, untrimmed.
    Task(&'a str),
}

/// Classify a raw line. The sentinel matches after trimming whitespace.
pub fn classify_line(line: &str) -> TaskLine<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        TaskLine::Idle
    } else if trimmed == SENTINEL {
        TaskLine::Kill
    } else {
        TaskLine::Task(line)
    }
}
