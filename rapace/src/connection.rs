//! The `Connection` (C5, spec §4.5): performs the handshake and owns the
//! single shared dispatch loop that both connection halves read from.

use std::sync::Arc;

use rapace_core::header::{self, RequestHeader, ResponseHeader, Side};
use rapace_core::{Frame, Value};
use rapace_transport::{Transport, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::ChannelClient;
use crate::server::{ChannelServer, ChannelServerConfig};

/// A connected pair of [`ChannelServer`] and [`ChannelClient`], sharing one
/// transport's receive stream.
pub struct Connection {
    pub server: Arc<ChannelServer>,
    pub client: Arc<ChannelClient>,
    dispatch: JoinHandle<()>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl Connection {
    /// Perform the handshake and start the shared dispatch loop.
    ///
    /// Spec §4.5: "the owning side writes its context as a single encoded
    /// Value before instantiating C3 and C4; the remote C3 reads that
    /// first frame to populate its own `ctx` before serving." This is a
    /// raw pre-handshake frame, distinct from the `[200]` `Initialize`
    /// response each constructed `ChannelServer` emits afterward (spec
    /// §4.3).
    pub async fn connect(
        transport: Arc<dyn Transport>,
        local_ctx: Value,
        server_config: ChannelServerConfig,
    ) -> Result<Connection, TransportError> {
        transport.send(Frame::new(local_ctx, Value::Absent)).await?;
        let handshake = transport.recv().await?;
        let remote_ctx = handshake.header;

        let server = ChannelServer::new(transport.clone(), remote_ctx, server_config).await;
        let client = ChannelClient::new(transport.clone());

        let (closed_tx, closed_rx) = watch::channel(false);
        let dispatch = spawn_dispatch_loop(transport.clone(), server.clone(), client.clone(), closed_tx.clone());

        Ok(Connection {
            server,
            client,
            dispatch,
            closed_tx,
            closed_rx,
        })
    }

    /// Tear down both halves and stop the dispatch loop.
    pub fn dispose(&self) {
        self.server.dispose();
        self.client.dispose();
        self.dispatch.abort();
        let _ = self.closed_tx.send(true);
    }

    /// Resolve once the dispatch loop has stopped, whether because the
    /// transport closed on its own or because [`Connection::dispose`] was
    /// called. Used by `rapace-hub` to fire its removal signal without
    /// polling.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

fn spawn_dispatch_loop(
    transport: Arc<dyn Transport>,
    server: Arc<ChannelServer>,
    client: Arc<ChannelClient>,
    closed_tx: watch::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = match transport.recv().await {
                Ok(frame) => frame,
                Err(TransportError::Closed) => {
                    debug!("transport closed, disposing connection");
                    server.dispose();
                    client.dispose();
                    let _ = closed_tx.send(true);
                    break;
                }
                Err(err) => {
                    warn!(?err, "transport error, disposing connection");
                    server.dispose();
                    client.dispose();
                    let _ = closed_tx.send(true);
                    break;
                }
            };

            // Spec §7: a FramingError is fatal at the endpoint that
            // observed it ("caller SHOULD dispose the connection"), so a
            // malformed header tears down this connection rather than
            // merely dropping the one frame.
            match header::classify(&frame.header) {
                Ok(Side::Request) => match RequestHeader::from_value(&frame.header) {
                    Ok(header) => server.handle_frame(header, frame.body).await,
                    Err(err) => {
                        warn!(?err, "malformed request header, disposing connection");
                        server.dispose();
                        client.dispose();
                        let _ = closed_tx.send(true);
                        break;
                    }
                },
                Ok(Side::Response) => match ResponseHeader::from_value(&frame.header) {
                    Ok(header) => client.handle_frame(header, frame.body),
                    Err(err) => {
                        warn!(?err, "malformed response header, disposing connection");
                        server.dispose();
                        client.dispose();
                        let _ = closed_tx.send(true);
                        break;
                    }
                },
                Err(err) => {
                    warn!(?err, "unclassifiable header, disposing connection");
                    server.dispose();
                    client.dispose();
                    let _ = closed_tx.send(true);
                    break;
                }
            }
        }
    })
}
