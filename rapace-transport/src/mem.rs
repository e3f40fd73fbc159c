//! In-process transport: a paired `tokio::sync::mpsc` channel carrying
//! whole frames directly, with no byte-level encoding at all.
//!
//! Grounded on the teacher's `rapace-core::transport::mem::MemTransport`,
//! which pairs two `mpsc` channels the same way; frames never leave the
//! process so there is nothing to (de)serialize.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rapace_core::Frame;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::{Transport, TransportError};

const CHANNEL_CAPACITY: usize = 64;

/// One side of an in-process transport pair.
#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<Inner>,
}

struct Inner {
    tx: mpsc::Sender<Frame>,
    rx: AsyncMutex<mpsc::Receiver<Frame>>,
    closed: AtomicBool,
}

impl MemTransport {
    /// Create a connected pair. Each side's `send` delivers to the other
    /// side's `recv`.
    pub fn pair() -> (MemTransport, MemTransport) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = MemTransport {
            inner: Arc::new(Inner {
                tx: tx_b,
                rx: AsyncMutex::new(rx_a),
                closed: AtomicBool::new(false),
            }),
        };
        let b = MemTransport {
            inner: Arc::new(Inner {
                tx: tx_a,
                rx: AsyncMutex::new(rx_b),
                closed: AtomicBool::new(false),
            }),
        };
        (a, b)
    }
}

#[async_trait]
impl Transport for MemTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.inner
            .tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapace_core::Value;

    #[tokio::test]
    async fn pair_delivers_in_order() {
        let (a, b) = MemTransport::pair();
        for i in 0..5u64 {
            a.send(Frame::new(Value::int(i), Value::Absent)).await.unwrap();
        }
        for i in 0..5u64 {
            let frame = b.recv().await.unwrap();
            assert_eq!(frame.header.as_u64(), Some(i));
        }
    }

    #[tokio::test]
    async fn close_is_observed_by_local_send_and_remote_recv() {
        let (a, b) = MemTransport::pair();
        a.close();
        assert!(a.is_closed());
        let err = a.send(Frame::new(Value::Absent, Value::Absent)).await;
        assert_eq!(err, Err(TransportError::Closed));

        // Dropping the sender side (via close + drop) lets the peer observe EOF.
        drop(a);
        let err = b.recv().await;
        assert_eq!(err, Err(TransportError::Closed));
    }
}
