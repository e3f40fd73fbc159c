//! Byte-stream transport: layers a u32be length prefix over the frame
//! codec so that whole frames can be delineated on any ordered, reliable
//! byte stream (a real socket, a pipe, `tokio::io::duplex` for tests).
//!
//! The length prefix is the transport's own framing, kept deliberately
//! separate from the `Value`-level length prefixes inside a frame (spec
//! §4.2: "The core never fragments or reassembles; framing is the
//! transport's job").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rapace_core::{Frame, MAX_FRAME_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::{Transport, TransportError};

/// Wraps any `AsyncRead + AsyncWrite` byte stream as a [`Transport`].
pub struct StreamTransport<S> {
    reader: AsyncMutex<tokio::io::ReadHalf<S>>,
    writer: AsyncMutex<tokio::io::WriteHalf<S>>,
    closed: AtomicBool,
    max_frame_len: usize,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Arc<Self> {
        Self::with_max_frame_len(stream, MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(stream: S, max_frame_len: usize) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        Arc::new(StreamTransport {
            reader: AsyncMutex::new(read_half),
            writer: AsyncMutex::new(write_half),
            closed: AtomicBool::new(false),
            max_frame_len,
        })
    }
}

impl StreamTransport<tokio::io::DuplexStream> {
    /// A connected in-memory duplex pair, useful for exercising the
    /// length-prefix framing without a real socket.
    pub fn duplex_pair(buffer: usize) -> (Arc<Self>, Arc<Self>) {
        let (a, b) = tokio::io::duplex(buffer);
        (StreamTransport::new(a), StreamTransport::new(b))
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + 'static,
{
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let bytes = frame.encode();
        if bytes.len() > self.max_frame_len {
            return Err(TransportError::SendFailed);
        }
        let mut writer = self.writer.lock().await;
        let len = bytes.len() as u32;
        writer
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|_| TransportError::SendFailed)?;
        writer
            .write_all(&bytes)
            .await
            .map_err(|_| TransportError::SendFailed)?;
        writer.flush().await.map_err(|_| TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut reader = self.reader.lock().await;

        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.close();
                return Err(TransportError::Closed);
            }
            Err(_) => return Err(TransportError::Malformed),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_len {
            return Err(TransportError::Malformed);
        }

        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|_| TransportError::Malformed)?;

        Frame::decode(&body, self.max_frame_len).map_err(|_| TransportError::Malformed)
    }

    async fn drain(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(|_| TransportError::SendFailed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapace_core::Value;

    #[tokio::test]
    async fn duplex_pair_roundtrips_frames() {
        let (a, b) = StreamTransport::duplex_pair(4096);
        let frame = Frame::new(Value::int(42), Value::Text("hi".into()));
        a.send(frame.clone()).await.unwrap();
        let received = b.recv().await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn peer_shutdown_surfaces_as_closed() {
        let (a, b) = StreamTransport::duplex_pair(4096);
        drop(a);
        let err = b.recv().await;
        assert_eq!(err, Err(TransportError::Closed));
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn oversize_incoming_length_rejected() {
        let (a, b) = StreamTransport::duplex_pair(4096);
        // Write a declared length bigger than the configured ceiling without
        // ever supplying that many payload bytes.
        {
            let mut writer = a.writer.lock().await;
            writer
                .write_all(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes())
                .await
                .unwrap();
            writer.flush().await.unwrap();
        }
        let err = b.recv().await;
        assert_eq!(err, Err(TransportError::Malformed));
    }
}
