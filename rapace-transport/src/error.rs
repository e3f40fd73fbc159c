use std::fmt;

/// Transport-level failure (spec §7 `TransportError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The transport has been closed, locally or by the peer.
    Closed,
    /// The underlying carrier rejected or dropped a send.
    SendFailed,
    /// A received frame could not be decoded (the transport delivered the
    /// bytes, but they did not form a valid frame).
    Malformed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::SendFailed => write!(f, "send failed"),
            TransportError::Malformed => write!(f, "received frame was malformed"),
        }
    }
}

impl std::error::Error for TransportError {}
