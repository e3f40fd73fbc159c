//! The self-describing `Value` union and its byte encoding.
//!
//! Encoding is length-prefixed and strictly positional (spec §4.1): every
//! value begins with a one-byte tag, and variable-length kinds are
//! followed by a four-byte big-endian unsigned length before the payload.

use bytes::Bytes;

use crate::error::FramingError;

/// Tag bytes for each `Value` kind, per spec §4.1.
pub mod tag {
    pub const ABSENT: u8 = 0x00;
    pub const TEXT: u8 = 0x01;
    pub const OPAQUE_BYTES: u8 = 0x02;
    pub const FRAMED_BYTES: u8 = 0x03;
    pub const SEQUENCE: u8 = 0x04;
    pub const STRUCTURED: u8 = 0x05;
}

/// A tagged, self-describing value carried in a frame header or body.
///
/// Two distinct byte kinds exist (`Opaque` and `Framed`) so that the
/// original pointer/view semantics of a transport's payload can round-trip
/// (spec §3); this crate treats them identically except for the tag byte,
/// leaving the distinction meaningful to callers that care which kind they
/// received.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// No value was present.
    Absent,
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes (e.g. a detached buffer).
    Opaque(Bytes),
    /// Framed bytes (e.g. a view into a larger buffer).
    Framed(Bytes),
    /// An ordered sequence of values.
    Seq(Vec<Value>),
    /// A JSON-like structured value, rendered as text on the wire.
    Structured(serde_json::Value),
}

impl Value {
    /// Shorthand for a structured integer, used throughout the header
    /// grammar (request/response tags and ids are "small integers" per
    /// spec §3, encoded as `Structured` JSON numbers — see DESIGN.md for
    /// why the wire format has no dedicated integer tag).
    pub fn int(v: u64) -> Value {
        Value::Structured(serde_json::Value::from(v))
    }

    /// Read back an integer written with [`Value::int`].
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Structured(serde_json::Value::Number(n)) => n.as_u64(),
            _ => None,
        }
    }

    /// Read back text from either a `Text` value or a structured JSON string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            Value::Structured(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow the inner JSON document of a `Structured` value.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Structured(json) => Some(json),
            _ => None,
        }
    }

    /// Encode this value into `out`, following the wire rules in spec §4.1.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Absent => out.push(tag::ABSENT),
            Value::Text(s) => {
                out.push(tag::TEXT);
                write_len_prefixed(out, s.as_bytes());
            }
            Value::Opaque(bytes) => {
                out.push(tag::OPAQUE_BYTES);
                write_len_prefixed(out, bytes);
            }
            Value::Framed(bytes) => {
                out.push(tag::FRAMED_BYTES);
                write_len_prefixed(out, bytes);
            }
            Value::Seq(items) => {
                out.push(tag::SEQUENCE);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.encode(out);
                }
            }
            Value::Structured(json) => {
                out.push(tag::STRUCTURED);
                // serde_json::to_string cannot fail for a Value that was
                // built in-process; a value decoded from a prior frame
                // round-trips because it was produced the same way.
                let text = serde_json::to_string(json).expect("Value is always serializable");
                write_len_prefixed(out, text.as_bytes());
            }
        }
    }

    /// Encode this value into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decode one value from the front of `buf`, returning the value and
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Value, usize), FramingError> {
        let (tag, mut pos) = read_u8(buf, 0)?;
        match tag {
            tag::ABSENT => Ok((Value::Absent, pos)),
            tag::TEXT => {
                let (bytes, end) = read_len_prefixed(buf, pos)?;
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|_| FramingError::InvalidUtf8)?;
                Ok((Value::Text(s), end))
            }
            tag::OPAQUE_BYTES => {
                let (bytes, end) = read_len_prefixed(buf, pos)?;
                Ok((Value::Opaque(Bytes::copy_from_slice(bytes)), end))
            }
            tag::FRAMED_BYTES => {
                let (bytes, end) = read_len_prefixed(buf, pos)?;
                Ok((Value::Framed(Bytes::copy_from_slice(bytes)), end))
            }
            tag::SEQUENCE => {
                let (count, end) = read_u32(buf, pos)?;
                pos = end;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (item, consumed) = Value::decode(&buf[pos..])?;
                    items.push(item);
                    pos += consumed;
                }
                Ok((Value::Seq(items), pos))
            }
            tag::STRUCTURED => {
                let (bytes, end) = read_len_prefixed(buf, pos)?;
                let text =
                    std::str::from_utf8(bytes).map_err(|_| FramingError::InvalidUtf8)?;
                let json: serde_json::Value =
                    serde_json::from_str(text).map_err(|_| FramingError::InvalidStructured)?;
                Ok((Value::Structured(json), end))
            }
            other => Err(FramingError::UnknownTag(other)),
        }
    }
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn read_u8(buf: &[u8], pos: usize) -> Result<(u8, usize), FramingError> {
    let byte = *buf.get(pos).ok_or(FramingError::Truncated)?;
    Ok((byte, pos + 1))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<(u32, usize), FramingError> {
    let slice = buf.get(pos..pos + 4).ok_or(FramingError::Truncated)?;
    let mut array = [0u8; 4];
    array.copy_from_slice(slice);
    Ok((u32::from_be_bytes(array), pos + 4))
}

fn read_len_prefixed(buf: &[u8], pos: usize) -> Result<(&[u8], usize), FramingError> {
    let (len, body_start) = read_u32(buf, pos)?;
    let len = len as usize;
    let body_end = body_start.checked_add(len).ok_or(FramingError::Truncated)?;
    let bytes = buf.get(body_start..body_end).ok_or(FramingError::Truncated)?;
    Ok((bytes, body_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let bytes = v.to_bytes();
        let (decoded, consumed) = Value::decode(&bytes).expect("decode should succeed");
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, v);
    }

    #[test]
    fn roundtrip_absent() {
        roundtrip(Value::Absent);
    }

    #[test]
    fn roundtrip_text() {
        roundtrip(Value::Text("hello".to_string()));
        roundtrip(Value::Text(String::new()));
    }

    #[test]
    fn roundtrip_opaque_bytes() {
        roundtrip(Value::Opaque(Bytes::from_static(b"\x00\x01\xff")));
    }

    #[test]
    fn roundtrip_framed_bytes() {
        roundtrip(Value::Framed(Bytes::from_static(b"view")));
    }

    #[test]
    fn roundtrip_sequence() {
        roundtrip(Value::Seq(vec![
            Value::int(100),
            Value::int(7),
            Value::Text("ping".to_string()),
            Value::Text("echo".to_string()),
        ]));
        roundtrip(Value::Seq(vec![]));
    }

    #[test]
    fn roundtrip_nested_sequence() {
        roundtrip(Value::Seq(vec![Value::Seq(vec![Value::Absent, Value::int(1)])]));
    }

    #[test]
    fn roundtrip_structured() {
        roundtrip(Value::Structured(serde_json::json!({
            "message": "bad",
            "name": "Error",
            "stack": ["line1", "line2", "line3"],
        })));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let err = Value::decode(&[0xAB]).unwrap_err();
        assert_eq!(err, FramingError::UnknownTag(0xAB));
    }

    #[test]
    fn decode_rejects_truncated_length() {
        let err = Value::decode(&[tag::TEXT, 0x00, 0x00]).unwrap_err();
        assert_eq!(err, FramingError::Truncated);
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        // Claims 10 bytes of text but only provides 2.
        let mut buf = vec![tag::TEXT];
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"hi");
        let err = Value::decode(&buf).unwrap_err();
        assert_eq!(err, FramingError::Truncated);
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let mut buf = vec![tag::TEXT];
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.push(0xFF);
        let err = Value::decode(&buf).unwrap_err();
        assert_eq!(err, FramingError::InvalidUtf8);
    }

    #[test]
    fn decode_rejects_invalid_structured_json() {
        let mut buf = vec![tag::STRUCTURED];
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"{]{");
        let err = Value::decode(&buf).unwrap_err();
        assert_eq!(err, FramingError::InvalidStructured);
    }

    #[test]
    fn int_and_str_accessors() {
        assert_eq!(Value::int(7).as_u64(), Some(7));
        assert_eq!(Value::Text("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Absent.as_u64(), None);
    }

    #[test]
    fn as_json_only_matches_structured() {
        let structured = Value::Structured(serde_json::json!({"a": 1}));
        assert!(structured.as_json().is_some());
        assert!(Value::Text("x".into()).as_json().is_none());
    }

    #[test]
    fn codec_accepts_its_own_output_for_every_kind() {
        let values = vec![
            Value::Absent,
            Value::Text("t".into()),
            Value::Opaque(Bytes::from_static(b"o")),
            Value::Framed(Bytes::from_static(b"f")),
            Value::Seq(vec![Value::int(1), Value::int(2)]),
            Value::Structured(serde_json::json!(42)),
        ];
        for v in values {
            roundtrip(v);
        }
    }
}
