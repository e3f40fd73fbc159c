#![doc = include_str!("../README.md")]

mod error;
mod mem;
mod stream;

pub use error::TransportError;
pub use mem::MemTransport;
pub use stream::StreamTransport;

use async_trait::async_trait;
use rapace_core::Frame;

/// The transport contract the rapace core depends on (spec §4.2).
///
/// A transport sends and delivers whole frames atomically; it never
/// fragments or reassembles one (that is the core's decision to make, not
/// the transport's). `recv` is meant to be called in a loop from a single
/// consumer — the spec models delivery as a single-subscriber stream, and
/// a `recv` loop is the natural Rust shape for that.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one frame. Must not return until the frame is handed to the
    /// underlying carrier (it need not be acknowledged by the peer).
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Receive the next frame in arrival order. Returns
    /// `TransportError::Closed` once the peer has disconnected and no
    /// more frames will ever arrive.
    async fn recv(&self) -> Result<Frame, TransportError>;

    /// Await until the send buffer is empty. Transports with no buffering
    /// concept may leave this as a no-op (spec §4.2: "optionally expose").
    async fn drain(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Tear down the transport. Idempotent.
    fn close(&self);

    /// Whether `close` has been called, or the peer has disconnected.
    fn is_closed(&self) -> bool;
}
