//! Error types shared by the wire layer: malformed frames (§4.1) and the
//! `CallErr` error payload shape (§6, §7).

use std::fmt;

/// A malformed frame: an unknown tag, a truncated length, or invalid
/// content for a kind that declares one (invalid UTF-8, invalid JSON).
///
/// Per spec §7, a `FramingError` is fatal to the endpoint that observed
/// it — the caller should dispose the connection, not retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramingError {
    /// The buffer ended before a declared length could be satisfied.
    Truncated,
    /// The leading tag byte did not match any known `Value` kind.
    UnknownTag(u8),
    /// `Text` or `Structured` payload bytes were not valid UTF-8.
    InvalidUtf8,
    /// `Structured` payload bytes were valid UTF-8 but not valid JSON.
    InvalidStructured,
    /// The header did not match the request/response grammar in §6.
    MalformedHeader,
    /// The frame exceeded the configured size ceiling (spec §4.1: "MAY
    /// refuse frames exceeding an implementation-defined ceiling").
    FrameTooLarge { len: usize, max: usize },
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::Truncated => write!(f, "frame ended before declared length"),
            FramingError::UnknownTag(tag) => write!(f, "unknown value tag: 0x{tag:02x}"),
            FramingError::InvalidUtf8 => write!(f, "payload was not valid utf-8"),
            FramingError::InvalidStructured => {
                write!(f, "structured payload was not valid json")
            }
            FramingError::MalformedHeader => {
                write!(f, "header did not match the request/response grammar")
            }
            FramingError::FrameTooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds the {max} byte ceiling")
            }
        }
    }
}

impl std::error::Error for FramingError {}

/// The `{message, name, stack}` structured payload carried by a `CallErr`
/// response (spec §6).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Stack>,
}

impl ErrorPayload {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorPayload {
            message: message.into(),
            name: name.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: Stack) -> Self {
        self.stack = Some(stack);
        self
    }

    /// The canned `UnknownChannel` error the server sends when a deferred
    /// request's timeout expires (spec §4.3, §7).
    pub fn unknown_channel(channel: &str) -> Self {
        ErrorPayload::new("Unknown channel", format!("channel '{channel}' was never registered"))
    }
}

/// A normalized stack trace: either the original text, or the
/// split-by-line representation the server produces when re-emitting a
/// standard-shaped thrown value (spec §4.3: "normalizing stack to a
/// split-by-line representation").
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Stack {
    Lines(Vec<String>),
    Text(String),
}

impl Stack {
    pub fn from_text(text: &str) -> Self {
        Stack::Lines(text.lines().map(str::to_string).collect())
    }
}
