//! Frame parsing and validation errors.
//!
//! Mirrors the shape of a hand-rolled error enum over a streaming parser:
//! distinct variants for "need more bytes" versus "this buffer will never
//! parse", since the two call for different caller behavior.

use std::fmt;
use std::fmt::Display;

#[derive(Debug)]
pub enum FrameError {
    /// Buffer does not yet hold a complete frame; caller should read more
    /// bytes and retry. Carries the minimum additional bytes needed.
    Need(usize),

    /// Frame type tag is not one of the known control/data tags.
    UnknownType(u8),

    /// Declared payload length exceeds the configured maximum.
    LengthOverflow(u32),

    /// Control payload bytes are not valid UTF-8 JSON for the declared type.
    InvalidPayload(String),
}

impl std::error::Error for FrameError {}

impl Display for FrameError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::Need(n) => write!(fmt, "need {n} more bytes"),
            FrameError::UnknownType(t) => write!(fmt, "unknown frame type 0x{t:02x}"),
            FrameError::LengthOverflow(len) => {
                write!(fmt, "payload length {len} exceeds configured maximum")
            }
            FrameError::InvalidPayload(msg) => write!(fmt, "invalid control payload: {msg}"),
        }
    }
}
