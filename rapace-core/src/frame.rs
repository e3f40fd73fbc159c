//! A [`Frame`] is one (header, body) pair on the wire (spec §3, §6).
//!
//! The writer serializes header then body concatenated; the reader
//! consumes them in order from a single frame (spec §4.1). A `Frame` is
//! the unit the transport adapter sends and delivers whole (spec §4.2):
//! the core never fragments or reassembles one.

use crate::error::FramingError;
use crate::header::{RequestHeader, ResponseHeader};
use crate::value::Value;

/// Default ceiling on encoded frame size, past which decoding fails with
/// [`FramingError::FrameTooLarge`] (spec §4.1, §9: "implementers should
/// choose a ceiling and reject oversize frames").
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One (header, body) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub header: Value,
    pub body: Value,
}

impl Frame {
    pub fn new(header: Value, body: Value) -> Self {
        Frame { header, body }
    }

    pub fn request(header: &RequestHeader, body: Value) -> Self {
        Frame::new(header.to_value(), body)
    }

    pub fn response(header: &ResponseHeader, body: Value) -> Self {
        Frame::new(header.to_value(), body)
    }

    /// Encode header then body, concatenated, as spec §4.1 requires.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.header.encode(&mut out);
        self.body.encode(&mut out);
        out
    }

    /// Decode a complete frame from `buf`, enforcing `max_len`.
    ///
    /// `buf` must contain exactly one frame: the transport is responsible
    /// for delivering whole frames (spec §4.2), so any bytes left over
    /// after decoding header+body indicate a transport bug, not a framing
    /// error the core should paper over.
    pub fn decode(buf: &[u8], max_len: usize) -> Result<Frame, FramingError> {
        if buf.len() > max_len {
            return Err(FramingError::FrameTooLarge {
                len: buf.len(),
                max: max_len,
            });
        }
        let (header, header_len) = Value::decode(buf)?;
        let (body, body_len) = Value::decode(&buf[header_len..])?;
        // The transport hands us exactly one frame's worth of bytes (spec
        // §4.2); anything left over after header+body is either a
        // transport bug or a malicious peer, not something to paper over.
        if header_len + body_len != buf.len() {
            return Err(FramingError::MalformedHeader);
        }
        Ok(Frame::new(header, body))
    }
}
