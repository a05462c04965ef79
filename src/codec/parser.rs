//! Streaming frame encoder/decoder over the 5-byte header defined in
//! [`crate::codec::frame`].
//!
//! Decoding is tolerant of TCP segment splitting and coalescing: a caller
//! keeps accumulating bytes into a buffer and calls [`decode_all`] after
//! every read, which drains as many complete frames as are present and
//! leaves the residual (partial) bytes in the buffer for next time.

use super::errors::FrameError;
use super::frame::{
    AuthRequestPayload, AuthResponsePayload, ConfigPushPayload, DataFrame, ErrorPayload, Frame,
    FrameType, HDR_LEN,
};
use bytes::{Buf, BufMut, BytesMut};

/// Default cap on a single frame's payload (spec.md §4.1).
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// Encode `frame` onto `out`, appending header + payload.
pub fn encode(frame: &Frame, out: &mut BytesMut) -> Result<(), FrameError> {
    let tag = frame.frame_type() as u8;
    let payload = match frame {
        Frame::AuthRequest(p) => {
            serde_json::to_vec(p).map_err(|e| FrameError::InvalidPayload(e.to_string()))?
        }
        Frame::AuthResponse(p) => {
            serde_json::to_vec(p).map_err(|e| FrameError::InvalidPayload(e.to_string()))?
        }
        Frame::ConfigPush(p) => {
            serde_json::to_vec(p).map_err(|e| FrameError::InvalidPayload(e.to_string()))?
        }
        Frame::Error(p) => {
            serde_json::to_vec(p).map_err(|e| FrameError::InvalidPayload(e.to_string()))?
        }
        Frame::KeepAlive | Frame::KeepAliveAck | Frame::Disconnect => Vec::new(),
        Frame::Data(d) => d.payload.clone(),
    };

    if payload.len() > u32::MAX as usize {
        return Err(FrameError::LengthOverflow(u32::MAX));
    }

    out.reserve(HDR_LEN + payload.len());
    out.put_u8(tag);
    out.put_u32(payload.len() as u32);
    out.put_slice(&payload);
    Ok(())
}

/// Attempt to decode exactly one frame from the front of `buf`.
///
/// On success, returns the frame and the number of bytes consumed; the
/// caller is responsible for advancing/truncating `buf` by that amount.
/// `buf` itself is never mutated.
pub fn decode_one(buf: &[u8], max_payload: usize) -> Result<(Frame, usize), FrameError> {
    if buf.len() < HDR_LEN {
        return Err(FrameError::Need(HDR_LEN - buf.len()));
    }

    let tag = buf[0];
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;

    if len > max_payload {
        return Err(FrameError::LengthOverflow(len as u32));
    }

    let total = HDR_LEN + len;
    if buf.len() < total {
        return Err(FrameError::Need(total - buf.len()));
    }

    let payload = &buf[HDR_LEN..total];
    let frame = decode_payload(tag, payload)?;
    Ok((frame, total))
}

fn decode_payload(tag: u8, payload: &[u8]) -> Result<Frame, FrameError> {
    let frame_type = FrameType::from_tag(tag).ok_or(FrameError::UnknownType(tag))?;
    Ok(match frame_type {
        FrameType::AuthRequest => Frame::AuthRequest(
            serde_json::from_slice::<AuthRequestPayload>(payload)
                .map_err(|e| FrameError::InvalidPayload(e.to_string()))?,
        ),
        FrameType::AuthResponse => Frame::AuthResponse(
            serde_json::from_slice::<AuthResponsePayload>(payload)
                .map_err(|e| FrameError::InvalidPayload(e.to_string()))?,
        ),
        FrameType::ConfigPush => Frame::ConfigPush(
            serde_json::from_slice::<ConfigPushPayload>(payload)
                .map_err(|e| FrameError::InvalidPayload(e.to_string()))?,
        ),
        FrameType::KeepAlive => Frame::KeepAlive,
        FrameType::KeepAliveAck => Frame::KeepAliveAck,
        FrameType::Disconnect => Frame::Disconnect,
        FrameType::Error => Frame::Error(
            serde_json::from_slice::<ErrorPayload>(payload)
                .map_err(|e| FrameError::InvalidPayload(e.to_string()))?,
        ),
        FrameType::DataPacket => Frame::Data(DataFrame {
            payload: payload.to_vec(),
        }),
    })
}

/// Drain every complete frame currently sitting in `buf`, advancing past
/// each one consumed. Stops (without error) at the first `Need` — the
/// remaining bytes stay in `buf` for the next read. A hard decode error
/// for any other reason is returned immediately, with `buf` left
/// positioned at the start of the offending frame.
pub fn decode_all(buf: &mut BytesMut, max_payload: usize) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    loop {
        match decode_one(buf, max_payload) {
            Ok((frame, consumed)) => {
                frames.push(frame);
                buf.advance(consumed);
            }
            Err(FrameError::Need(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(frames)
}
