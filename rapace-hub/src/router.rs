//! Router / Multicast (C7, spec §4.7): two strategies for picking which
//! connection services a call or event subscription issued against the
//! hub rather than against one specific `Connection`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rapace::{CallError, CancelToken, Connection, Subscription};
use rapace_core::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::hub::{ConnectionEvent, ConnectionHub, ConnectionId};

/// A synchronous predicate over a live connection, shared across the
/// strategies below.
pub type Predicate = Arc<dyn Fn(&Connection) -> bool + Send + Sync>;

/// A user-supplied selection strategy (spec §4.7: "a user-supplied object
/// with `routeCall`/`routeEvent`"). `channel`/`method`/`event`/`arg` are
/// passed through so a router can make its decision based on what is being
/// invoked, not just which connections exist.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    async fn route_call(&self, hub: &ConnectionHub, channel: &str, method: &str, arg: &Value) -> Arc<Connection>;
    async fn route_event(&self, hub: &ConnectionHub, channel: &str, event: &str, arg: &Value) -> Arc<Connection>;
}

/// Waits for the first live connection to subscribe to, then retries the
/// next `onConnectionAdded` on a broadcast lag or closed channel instead of
/// giving up.
async fn next_matching_added(events: &mut broadcast::Receiver<ConnectionEvent>, predicate: &Predicate) -> Arc<Connection> {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Added(_, connection)) if predicate(&connection) => return connection,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                // The hub itself is gone; nothing will ever arrive.
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// The hub's convenience router (spec §4.7): iterates current connections
/// and returns the first whose predicate resolves true, otherwise waits for
/// the next `onConnectionAdded` and retries. Liveness-preserving: a call
/// issued before any matching connection exists resolves once one joins.
pub struct StaticRouter {
    predicate: Predicate,
}

impl StaticRouter {
    pub fn new(predicate: Predicate) -> Self {
        StaticRouter { predicate }
    }

    async fn select(&self, hub: &ConnectionHub) -> Arc<Connection> {
        // Subscribe before taking the snapshot so an add racing with this
        // call can never be missed.
        let mut events = hub.subscribe();
        for (_, connection) in hub.connections() {
            if (self.predicate)(&connection) {
                return connection;
            }
        }
        next_matching_added(&mut events, &self.predicate).await
    }
}

#[async_trait]
impl Router for StaticRouter {
    async fn route_call(&self, hub: &ConnectionHub, _channel: &str, _method: &str, _arg: &Value) -> Arc<Connection> {
        self.select(hub).await
    }

    async fn route_event(&self, hub: &ConnectionHub, _channel: &str, _event: &str, _arg: &Value) -> Arc<Connection> {
        self.select(hub).await
    }
}

/// The other selection strategy (spec §4.7): a bare predicate. Calls pick
/// one matching connection uniformly at random; events fan in from every
/// matching connection at once via [`MultiplexedEvents`].
#[derive(Clone)]
pub struct Filter {
    predicate: Predicate,
}

impl Filter {
    pub fn new(predicate: Predicate) -> Self {
        Filter { predicate }
    }

    /// Pick one matching connection uniformly at random; if none exist,
    /// wait for the first add that matches.
    pub async fn route_call(&self, hub: &ConnectionHub) -> Arc<Connection> {
        let mut events = hub.subscribe();
        let matches: Vec<Arc<Connection>> = hub
            .connections()
            .into_iter()
            .map(|(_, connection)| connection)
            .filter(|connection| (self.predicate)(connection))
            .collect();
        if let Some(connection) = matches.choose(&mut rand::thread_rng()) {
            return connection.clone();
        }
        next_matching_added(&mut events, &self.predicate).await
    }

    /// Subscribe to `event` on every connection currently matching the
    /// predicate, and fan frames from all of them into one stream,
    /// dynamically subscribing/unsubscribing as connections come and go.
    /// Ordering across connections is unspecified; per-connection order is
    /// preserved.
    pub fn route_event(&self, hub: Arc<ConnectionHub>, channel: impl Into<String>, event: impl Into<String>, arg: Value) -> MultiplexedEvents {
        MultiplexedEvents::new(hub, self.predicate.clone(), channel.into(), event.into(), arg)
    }
}

fn spawn_listener(connection: Arc<Connection>, channel: String, event: String, arg: Value, sink: mpsc::UnboundedSender<Value>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut subscription = connection.client.listen(channel, event, arg);
        while let Some(value) = subscription.next().await {
            if sink.send(value).is_err() {
                break;
            }
        }
    })
}

/// A merged event stream spanning every connection matching a [`Filter`].
/// Dropping it tears down every underlying subscription (spec §4.7: "on
/// last unsubscribe, tear all of it down").
pub struct MultiplexedEvents {
    rx: mpsc::UnboundedReceiver<Value>,
    driver: JoinHandle<()>,
    children: Arc<Mutex<HashMap<ConnectionId, JoinHandle<()>>>>,
}

impl MultiplexedEvents {
    fn new(hub: Arc<ConnectionHub>, predicate: Predicate, channel: String, event: String, arg: Value) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let children: Arc<Mutex<HashMap<ConnectionId, JoinHandle<()>>>> = Arc::new(Mutex::new(HashMap::new()));
        let driver_children = children.clone();

        let driver = tokio::spawn(async move {
            let mut events = hub.subscribe();

            for (id, connection) in hub.connections() {
                if predicate(&connection) {
                    let handle = spawn_listener(connection, channel.clone(), event.clone(), arg.clone(), tx.clone());
                    driver_children.lock().insert(id, handle);
                }
            }

            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Added(id, connection)) if predicate(&connection) => {
                        let handle = spawn_listener(connection, channel.clone(), event.clone(), arg.clone(), tx.clone());
                        driver_children.lock().insert(id, handle);
                    }
                    Ok(ConnectionEvent::Removed(id)) => {
                        if let Some(handle) = driver_children.lock().remove(&id) {
                            handle.abort();
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        MultiplexedEvents { rx, driver, children }
    }

    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

impl Drop for MultiplexedEvents {
    fn drop(&mut self) {
        self.driver.abort();
        for (_, handle) in self.children.lock().drain() {
            handle.abort();
        }
    }
}

/// A deferred channel proxy bound to a [`Router`] (spec §4.7: "callers
/// never need to await selection explicitly"): each call or listen awaits
/// routing internally and then forwards to the connection it resolves to.
pub struct RoutedChannel {
    hub: Arc<ConnectionHub>,
    router: Arc<dyn Router>,
    channel: String,
}

impl RoutedChannel {
    pub fn new(hub: Arc<ConnectionHub>, router: Arc<dyn Router>, channel: impl Into<String>) -> Self {
        RoutedChannel {
            hub,
            router,
            channel: channel.into(),
        }
    }

    pub async fn call(&self, method: impl Into<String>, arg: Value, cancel: CancelToken) -> Result<Value, CallError> {
        let method = method.into();
        let connection = self.router.route_call(&self.hub, &self.channel, &method, &arg).await;
        connection.client.call(self.channel.clone(), method, arg, cancel).await
    }

    pub async fn listen(&self, event: impl Into<String>, arg: Value) -> Subscription {
        let event = event.into();
        let connection = self.router.route_event(&self.hub, &self.channel, &event, &arg).await;
        connection.client.listen(self.channel.clone(), event, arg)
    }
}

/// The same deferred-proxy convenience as [`RoutedChannel`], bound to a
/// [`Filter`] instead of a general [`Router`]: `listen` returns a
/// [`MultiplexedEvents`] fan-in rather than a single connection's stream.
pub struct FilteredChannel {
    hub: Arc<ConnectionHub>,
    filter: Filter,
    channel: String,
}

impl FilteredChannel {
    pub fn new(hub: Arc<ConnectionHub>, filter: Filter, channel: impl Into<String>) -> Self {
        FilteredChannel {
            hub,
            filter,
            channel: channel.into(),
        }
    }

    pub async fn call(&self, method: impl Into<String>, arg: Value, cancel: CancelToken) -> Result<Value, CallError> {
        let method = method.into();
        let connection = self.filter.route_call(&self.hub).await;
        connection.client.call(self.channel.clone(), method, arg, cancel).await
    }

    pub fn listen(&self, event: impl Into<String>, arg: Value) -> MultiplexedEvents {
        self.filter.route_event(self.hub.clone(), self.channel.clone(), event, arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ConnectionHub as Hub;
    use rapace::{ChannelServerConfig, Context, EventStream, HandlerError};
    use rapace_transport::MemTransport;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl rapace::Channel for Echo {
        async fn call(&self, _ctx: &Context, _method: &str, arg: Value, _cancel: CancelToken) -> Result<Value, HandlerError> {
            Ok(arg)
        }

        fn listen(&self, _ctx: &Context, event: &str, _arg: Value) -> Result<EventStream, HandlerError> {
            Err(HandlerError::unknown_event("echo", event))
        }
    }

    async fn connect_pair(hub: &Arc<Hub>) -> MemTransport {
        let (local, peer) = MemTransport::pair();
        let peer_task = tokio::spawn(async move {
            peer.send(rapace_core::Frame::new(Value::Absent, Value::Absent)).await.unwrap();
            peer.recv().await.unwrap(); // handshake
            peer.recv().await.unwrap(); // Initialize
            peer
        });
        hub.accept(Arc::new(local)).await.unwrap();
        peer_task.await.unwrap()
    }

    #[tokio::test]
    async fn static_router_resolves_once_a_connection_is_added() {
        let hub = Hub::new(Value::Absent, ChannelServerConfig::default());
        hub.register_channel("echo", Arc::new(Echo));

        let router = StaticRouter::new(Arc::new(|_: &Connection| true));
        let routed = RoutedChannel::new(hub.clone(), Arc::new(router), "echo");

        let hub_for_connect = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            connect_pair(&hub_for_connect).await;
        });

        let outcome = routed.call("ping", Value::Text("hi".into()), rapace::never_cancelled()).await.unwrap();
        assert_eq!(outcome, Value::Text("hi".into()));
    }

    #[tokio::test]
    async fn filter_picks_a_matching_connection() {
        let hub = Hub::new(Value::Absent, ChannelServerConfig::default());
        hub.register_channel("echo", Arc::new(Echo));
        connect_pair(&hub).await;

        let filter = Filter::new(Arc::new(|_: &Connection| true));
        let connection = filter.route_call(&hub).await;
        let outcome = connection.client.call("echo", "ping", Value::Text("hi".into()), rapace::never_cancelled()).await.unwrap();
        assert_eq!(outcome, Value::Text("hi".into()));
    }
}
