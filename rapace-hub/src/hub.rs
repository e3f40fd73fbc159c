//! The Connection Hub (C6, spec §4.6): a fan-in/fan-out surface over many
//! `Connection`s, with channels registered once and propagated to every
//! connection present and future.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rapace::{Channel, ChannelServerConfig, Connection};
use rapace_core::Value;
use rapace_transport::{Transport, TransportError};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub type ConnectionId = u64;

/// Fired when a connection joins or leaves the hub's live set (spec §4.6:
/// `onConnectionAdded`/`onConnectionRemoved`). `StaticRouter` subscribes to
/// this to retry selection as connections come and go.
#[derive(Clone)]
pub enum ConnectionEvent {
    Added(ConnectionId, Arc<Connection>),
    Removed(ConnectionId),
}

struct Inner {
    local_ctx: Value,
    server_config: ChannelServerConfig,
    channels: Mutex<HashMap<String, Arc<dyn Channel>>>,
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Owns the live set of connections accepted by an application-driven
/// listener loop, and the set of channels registered across all of them.
pub struct ConnectionHub {
    inner: Arc<Inner>,
}

impl ConnectionHub {
    pub fn new(local_ctx: Value, server_config: ChannelServerConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(ConnectionHub {
            inner: Arc::new(Inner {
                local_ctx,
                server_config,
                channels: Mutex::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events,
            }),
        })
    }

    /// Subscribe to the hub's add/remove signal.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Register `handler` for `name` on every live connection, and on
    /// every connection accepted afterward (spec §4.6: "updates every live
    /// connection's server in addition to future ones").
    pub fn register_channel(&self, name: impl Into<String>, handler: Arc<dyn Channel>) {
        let name = name.into();
        self.inner.channels.lock().insert(name.clone(), handler.clone());
        for connection in self.inner.connections.lock().values() {
            connection.server.register_channel(name.clone(), handler.clone());
        }
    }

    /// Drive one new client through the handshake and add it to the live
    /// set (spec §4.6, steps 1-4): perform `Connection::connect`, register
    /// every already-known channel on the fresh server, insert into the
    /// set, and fire `ConnectionEvent::Added`.
    ///
    /// Spawns a background watcher that fires `ConnectionEvent::Removed`
    /// and drops the connection from the set once it closes, standing in
    /// for the source's externally supplied `onClientDisconnected` signal
    /// (a bare byte transport has no disconnect notification of its own
    /// beyond the transport closing).
    pub async fn accept(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<ConnectionId, TransportError> {
        let connection = Connection::connect(transport, self.inner.local_ctx.clone(), self.inner.server_config.clone()).await?;
        let connection = Arc::new(connection);

        for (name, handler) in self.inner.channels.lock().iter() {
            connection.server.register_channel(name.clone(), handler.clone());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.connections.lock().insert(id, connection.clone());
        info!(id, "connection added");
        let _ = self.inner.events.send(ConnectionEvent::Added(id, connection.clone()));

        let hub = self.clone();
        let watched = connection.clone();
        tokio::spawn(async move {
            watched.closed().await;
            hub.remove(id);
        });

        Ok(id)
    }

    /// Remove a connection from the live set and fire
    /// `ConnectionEvent::Removed`, disposing it first if it has not
    /// already disposed itself.
    pub fn remove(&self, id: ConnectionId) {
        if let Some(connection) = self.inner.connections.lock().remove(&id) {
            connection.dispose();
            debug!(id, "connection removed");
            let _ = self.inner.events.send(ConnectionEvent::Removed(id));
        }
    }

    /// All connections currently in the live set, in no particular order.
    pub fn connections(&self) -> Vec<(ConnectionId, Arc<Connection>)> {
        self.inner
            .connections
            .lock()
            .iter()
            .map(|(id, conn)| (*id, conn.clone()))
            .collect()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.connections.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
