//! Request/response header grammar (spec §3, §6).
//!
//! A header is itself encoded as a [`Value::Seq`] of small integers and
//! strings. The integers (the subtype tag and the request id) are encoded
//! as [`Value::int`] — see DESIGN.md for why the wire format has no
//! dedicated integer `Value` kind.

use crate::error::FramingError;
use crate::value::Value;
use crate::RequestId;

/// Wire tag values for each request/response subtype, per spec §3.
pub mod tag {
    pub const CALL: u64 = 100;
    pub const CANCEL: u64 = 101;
    pub const SUBSCRIBE: u64 = 102;
    pub const UNSUBSCRIBE: u64 = 103;

    pub const INITIALIZE: u64 = 200;
    pub const CALL_OK: u64 = 201;
    pub const CALL_ERR: u64 = 202;
    pub const CALL_ERR_OBJ: u64 = 203;
    pub const EVENT_FIRE: u64 = 204;
}

/// One of the four request subtypes (spec §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestHeader {
    /// `[100, id, channel, method]`; body carries the call argument.
    Call { id: RequestId, channel: String, method: String },
    /// `[101, id]`.
    Cancel { id: RequestId },
    /// `[102, id, channel, event]`; body carries the subscribe argument.
    Subscribe { id: RequestId, channel: String, event: String },
    /// `[103, id]`.
    Unsubscribe { id: RequestId },
}

impl RequestHeader {
    pub fn id(&self) -> RequestId {
        match self {
            RequestHeader::Call { id, .. }
            | RequestHeader::Cancel { id }
            | RequestHeader::Subscribe { id, .. }
            | RequestHeader::Unsubscribe { id } => *id,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RequestHeader::Call { id, channel, method } => Value::Seq(vec![
                Value::int(tag::CALL),
                Value::int(*id),
                Value::Text(channel.clone()),
                Value::Text(method.clone()),
            ]),
            RequestHeader::Cancel { id } => {
                Value::Seq(vec![Value::int(tag::CANCEL), Value::int(*id)])
            }
            RequestHeader::Subscribe { id, channel, event } => Value::Seq(vec![
                Value::int(tag::SUBSCRIBE),
                Value::int(*id),
                Value::Text(channel.clone()),
                Value::Text(event.clone()),
            ]),
            RequestHeader::Unsubscribe { id } => {
                Value::Seq(vec![Value::int(tag::UNSUBSCRIBE), Value::int(*id)])
            }
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, FramingError> {
        let items = match value {
            Value::Seq(items) => items,
            _ => return Err(FramingError::MalformedHeader),
        };
        let head_tag = items
            .first()
            .and_then(Value::as_u64)
            .ok_or(FramingError::MalformedHeader)?;
        let id = items
            .get(1)
            .and_then(Value::as_u64)
            .ok_or(FramingError::MalformedHeader)?;
        match head_tag {
            tag::CALL => {
                let channel = items.get(2).and_then(Value::as_str).ok_or(FramingError::MalformedHeader)?;
                let method = items.get(3).and_then(Value::as_str).ok_or(FramingError::MalformedHeader)?;
                Ok(RequestHeader::Call {
                    id,
                    channel: channel.to_string(),
                    method: method.to_string(),
                })
            }
            tag::CANCEL => Ok(RequestHeader::Cancel { id }),
            tag::SUBSCRIBE => {
                let channel = items.get(2).and_then(Value::as_str).ok_or(FramingError::MalformedHeader)?;
                let event = items.get(3).and_then(Value::as_str).ok_or(FramingError::MalformedHeader)?;
                Ok(RequestHeader::Subscribe {
                    id,
                    channel: channel.to_string(),
                    event: event.to_string(),
                })
            }
            tag::UNSUBSCRIBE => Ok(RequestHeader::Unsubscribe { id }),
            _ => Err(FramingError::MalformedHeader),
        }
    }
}

/// One of the five response subtypes (spec §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseHeader {
    /// `[200]`; sent once by each server-role to signal readiness.
    Initialize,
    /// `[201, id]`; body carries the call result.
    CallOk { id: RequestId },
    /// `[202, id]`; body carries a structured `{message, name, stack?}`.
    CallErr { id: RequestId },
    /// `[203, id]`; body carries an arbitrary non-standard-error payload.
    CallErrObj { id: RequestId },
    /// `[204, id]`; body carries one event payload.
    EventFire { id: RequestId },
}

impl ResponseHeader {
    pub fn id(&self) -> Option<RequestId> {
        match self {
            ResponseHeader::Initialize => None,
            ResponseHeader::CallOk { id }
            | ResponseHeader::CallErr { id }
            | ResponseHeader::CallErrObj { id }
            | ResponseHeader::EventFire { id } => Some(*id),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ResponseHeader::Initialize => Value::Seq(vec![Value::int(tag::INITIALIZE)]),
            ResponseHeader::CallOk { id } => {
                Value::Seq(vec![Value::int(tag::CALL_OK), Value::int(*id)])
            }
            ResponseHeader::CallErr { id } => {
                Value::Seq(vec![Value::int(tag::CALL_ERR), Value::int(*id)])
            }
            ResponseHeader::CallErrObj { id } => {
                Value::Seq(vec![Value::int(tag::CALL_ERR_OBJ), Value::int(*id)])
            }
            ResponseHeader::EventFire { id } => {
                Value::Seq(vec![Value::int(tag::EVENT_FIRE), Value::int(*id)])
            }
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, FramingError> {
        let items = match value {
            Value::Seq(items) => items,
            _ => return Err(FramingError::MalformedHeader),
        };
        let head_tag = items
            .first()
            .and_then(Value::as_u64)
            .ok_or(FramingError::MalformedHeader)?;
        if head_tag == tag::INITIALIZE {
            return Ok(ResponseHeader::Initialize);
        }
        let id = items
            .get(1)
            .and_then(Value::as_u64)
            .ok_or(FramingError::MalformedHeader)?;
        match head_tag {
            tag::CALL_OK => Ok(ResponseHeader::CallOk { id }),
            tag::CALL_ERR => Ok(ResponseHeader::CallErr { id }),
            tag::CALL_ERR_OBJ => Ok(ResponseHeader::CallErrObj { id }),
            tag::EVENT_FIRE => Ok(ResponseHeader::EventFire { id }),
            _ => Err(FramingError::MalformedHeader),
        }
    }
}

/// Whether a decoded header value belongs to the request side (100-103)
/// or the response side (200-204), per spec §4.5: "frames whose first
/// header byte is a *request type* ... belong to C3; frames whose first
/// byte is a *response type* ... belong to C4."
pub enum Side {
    Request,
    Response,
}

/// Inspect the leading tag of a header value without fully parsing it.
pub fn classify(value: &Value) -> Result<Side, FramingError> {
    let items = match value {
        Value::Seq(items) => items,
        _ => return Err(FramingError::MalformedHeader),
    };
    let head_tag = items
        .first()
        .and_then(Value::as_u64)
        .ok_or(FramingError::MalformedHeader)?;
    match head_tag {
        tag::CALL | tag::CANCEL | tag::SUBSCRIBE | tag::UNSUBSCRIBE => Ok(Side::Request),
        tag::INITIALIZE | tag::CALL_OK | tag::CALL_ERR | tag::CALL_ERR_OBJ | tag::EVENT_FIRE => {
            Ok(Side::Response)
        }
        _ => Err(FramingError::MalformedHeader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_header_roundtrip() {
        let header = RequestHeader::Call {
            id: 7,
            channel: "ping".to_string(),
            method: "echo".to_string(),
        };
        let value = header.to_value();
        assert_eq!(RequestHeader::from_value(&value).unwrap(), header);
    }

    #[test]
    fn cancel_header_roundtrip() {
        let header = RequestHeader::Cancel { id: 3 };
        assert_eq!(RequestHeader::from_value(&header.to_value()).unwrap(), header);
    }

    #[test]
    fn subscribe_and_unsubscribe_roundtrip() {
        let sub = RequestHeader::Subscribe {
            id: 11,
            channel: "sys".to_string(),
            event: "tick".to_string(),
        };
        assert_eq!(RequestHeader::from_value(&sub.to_value()).unwrap(), sub);

        let unsub = RequestHeader::Unsubscribe { id: 11 };
        assert_eq!(RequestHeader::from_value(&unsub.to_value()).unwrap(), unsub);
    }

    #[test]
    fn initialize_has_no_id() {
        let header = ResponseHeader::Initialize;
        assert_eq!(header.id(), None);
        assert_eq!(ResponseHeader::from_value(&header.to_value()).unwrap(), header);
    }

    #[test]
    fn response_headers_roundtrip() {
        for header in [
            ResponseHeader::CallOk { id: 7 },
            ResponseHeader::CallErr { id: 7 },
            ResponseHeader::CallErrObj { id: 7 },
            ResponseHeader::EventFire { id: 11 },
        ] {
            assert_eq!(ResponseHeader::from_value(&header.to_value()).unwrap(), header);
        }
    }

    #[test]
    fn classify_separates_sides() {
        let call = RequestHeader::Call {
            id: 1,
            channel: "a".into(),
            method: "b".into(),
        }
        .to_value();
        assert!(matches!(classify(&call).unwrap(), Side::Request));

        let ok = ResponseHeader::CallOk { id: 1 }.to_value();
        assert!(matches!(classify(&ok).unwrap(), Side::Response));
    }

    #[test]
    fn malformed_header_rejected() {
        assert_eq!(
            RequestHeader::from_value(&Value::Absent).unwrap_err(),
            FramingError::MalformedHeader
        );
        assert_eq!(
            RequestHeader::from_value(&Value::Seq(vec![Value::int(999)])).unwrap_err(),
            FramingError::MalformedHeader
        );
    }
}
