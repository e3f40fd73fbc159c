//! The Channel Server (C3, spec §4.3): demultiplexes incoming requests to
//! registered channel handlers, tracks active requests for disposal, and
//! defers requests that arrive before their channel is registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use rapace_core::header::{RequestHeader, ResponseHeader};
use rapace_core::{ErrorPayload, RequestId, Value};
use rapace_transport::Transport;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::cancel::{cancel_pair, Canceller};
use crate::channel::{Channel, Context, HandlerError};

/// Tunables for a [`ChannelServer`].
#[derive(Clone, Debug)]
pub struct ChannelServerConfig {
    /// How long a `Call`/`Subscribe` for an unregistered channel waits
    /// before the server gives up (spec §4.3, default 1000ms).
    pub deferred_timeout: Duration,
}

impl Default for ChannelServerConfig {
    fn default() -> Self {
        ChannelServerConfig {
            deferred_timeout: Duration::from_millis(1000),
        }
    }
}

/// What to do when a `Cancel`/`Unsubscribe` disposes a live row.
enum ActiveRequest {
    Call(Canceller),
    Subscription(AbortHandle),
}

impl ActiveRequest {
    fn dispose(self) {
        match self {
            ActiveRequest::Call(canceller) => canceller.cancel(),
            ActiveRequest::Subscription(handle) => handle.abort(),
        }
    }
}

#[derive(Clone)]
enum DeferredKind {
    Call { method: String, arg: Value },
    Subscribe { event: String, arg: Value },
}

struct DeferredRow {
    id: RequestId,
    kind: DeferredKind,
    /// Guards against the timeout task and a later `registerChannel` flush
    /// racing to handle the same row; whichever wins the swap acts.
    claimed: Arc<AtomicBool>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    /// The peer's context, exchanged as a raw pre-handshake frame before
    /// either endpoint half is constructed (spec §4.5); opaque to this
    /// layer and handed to every handler invocation unchanged.
    ctx: Context,
    config: ChannelServerConfig,
    channels: Mutex<HashMap<String, Arc<dyn Channel>>>,
    active: Mutex<HashMap<RequestId, ActiveRequest>>,
    pending: Mutex<HashMap<String, Vec<DeferredRow>>>,
}

/// The server half of a connection (spec §4.3).
pub struct ChannelServer {
    inner: Arc<Inner>,
}

impl ChannelServer {
    /// Construct a server over `transport` with the already-known peer
    /// `ctx`, immediately emitting `Initialize` (spec §4.3: "at
    /// construction, immediately emit *Initialize* and begin consuming the
    /// transport"; the frame is `[200]` with an absent body — the peer's
    /// context was already exchanged by a separate raw frame per §4.5).
    pub async fn new(transport: Arc<dyn Transport>, ctx: Context, config: ChannelServerConfig) -> Arc<Self> {
        let inner = Arc::new(Inner {
            transport,
            ctx,
            config,
            channels: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        });
        inner.send_response(&ResponseHeader::Initialize, Value::Absent).await;
        Arc::new(ChannelServer { inner })
    }

    /// Register a handler for `name`. A previously registered handler for
    /// the same name is replaced without notification (spec §9, an
    /// explicit "preserve" decision on an ambiguous open question).
    /// Pending rows for `name` are flushed on the next dispatcher tick.
    pub fn register_channel(&self, name: impl Into<String>, handler: Arc<dyn Channel>) {
        let name = name.into();
        self.inner.channels.lock().insert(name.clone(), handler);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            // Yield once so synchronous code following registerChannel
            // (e.g. wiring up further channels) runs first (spec §9,
            // "Pending requests ordering").
            tokio::task::yield_now().await;
            let rows = inner.pending.lock().remove(&name).unwrap_or_default();
            for row in rows {
                if row.claimed.swap(true, Ordering::AcqRel) {
                    continue; // the deferred timeout already won the race.
                }
                inner.clone().dispatch_known(&name, row.id, row.kind).await;
            }
        });
    }

    /// Process one incoming request frame. Returns quickly: handler work
    /// runs on a spawned task so further frames keep being dispatched.
    pub async fn handle_frame(&self, header: RequestHeader, body: Value) {
        self.inner.clone().dispatch(header, body).await;
    }

    /// Dispose every active request and drop all pending rows (spec §3
    /// invariant 4, §5 "Disposal").
    pub fn dispose(&self) {
        let active = std::mem::take(&mut *self.inner.active.lock());
        for (_, row) in active {
            row.dispose();
        }
        self.inner.pending.lock().clear();
    }
}

impl Inner {
    async fn dispatch(self: Arc<Self>, header: RequestHeader, body: Value) {
        match header {
            RequestHeader::Call { id, channel, method } => {
                let handler = self.channels.lock().get(&channel).cloned();
                match handler {
                    Some(handler) => self.clone().run_call(id, handler, method, body).await,
                    None => self.defer(id, channel, DeferredKind::Call { method, arg: body }),
                }
            }
            RequestHeader::Subscribe { id, channel, event } => {
                let handler = self.channels.lock().get(&channel).cloned();
                match handler {
                    Some(handler) => self.clone().run_subscribe(id, handler, event, body).await,
                    None => self.defer(id, channel, DeferredKind::Subscribe { event, arg: body }),
                }
            }
            RequestHeader::Cancel { id } | RequestHeader::Unsubscribe { id } => {
                // Spec §4.3: dispose and remove the row keyed by id; a
                // missing row (unknown, or already settled) is a silent
                // no-op (spec §3 invariant 3).
                if let Some(row) = self.active.lock().remove(&id) {
                    row.dispose();
                }
            }
        }
    }

    async fn dispatch_known(self: Arc<Self>, channel: &str, id: RequestId, kind: DeferredKind) {
        let handler = match self.channels.lock().get(channel).cloned() {
            Some(handler) => handler,
            None => return, // registration was replaced again before the flush ran.
        };
        match kind {
            DeferredKind::Call { method, arg } => self.run_call(id, handler, method, arg).await,
            DeferredKind::Subscribe { event, arg } => self.run_subscribe(id, handler, event, arg).await,
        }
    }

    fn defer(self: &Arc<Self>, id: RequestId, channel: String, kind: DeferredKind) {
        let claimed = Arc::new(AtomicBool::new(false));
        self.pending.lock().entry(channel.clone()).or_default().push(DeferredRow {
            id,
            kind: kind.clone(),
            claimed: claimed.clone(),
        });

        let inner = self.clone();
        let timeout = self.config.deferred_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if claimed.swap(true, Ordering::AcqRel) {
                return; // already flushed by registerChannel.
            }
            inner.pending.lock().entry(channel.clone()).or_default().retain(|row| row.id != id);

            // Spec §4.3: "Stale deferred entries that survive to their
            // timeout emit CallErr only for Call requests; Subscribe
            // requests simply expire silently."
            if let DeferredKind::Call { .. } = kind {
                warn!(id, channel = channel.as_str(), "deferred call timed out");
                let payload = ErrorPayload::unknown_channel(&channel);
                inner
                    .send_response(
                        &ResponseHeader::CallErr { id },
                        Value::Structured(serde_json::to_value(payload).expect("ErrorPayload is serializable")),
                    )
                    .await;
            } else {
                debug!(id, channel = channel.as_str(), "deferred subscribe timed out");
            }
        });
    }

    async fn run_call(self: Arc<Self>, id: RequestId, handler: Arc<dyn Channel>, method: String, arg: Value) {
        let (canceller, token) = cancel_pair();
        self.active.lock().insert(id, ActiveRequest::Call(canceller));
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let result = handler.call(&ctx, &method, arg, token).await;
            // The row may already be gone (an explicit Cancel raced us);
            // removing an absent row is a no-op either way.
            self.active.lock().remove(&id);
            match result {
                Ok(value) => self.send_response(&ResponseHeader::CallOk { id }, value).await,
                Err(HandlerError::Standard(payload)) => {
                    let body = Value::Structured(
                        serde_json::to_value(payload).expect("ErrorPayload is serializable"),
                    );
                    self.send_response(&ResponseHeader::CallErr { id }, body).await;
                }
                Err(HandlerError::Raw(value)) => {
                    self.send_response(&ResponseHeader::CallErrObj { id }, value).await;
                }
            }
        });
    }

    async fn run_subscribe(self: Arc<Self>, id: RequestId, handler: Arc<dyn Channel>, event: String, arg: Value) {
        let ctx = self.ctx.clone();
        match handler.listen(&ctx, &event, arg) {
            Err(HandlerError::Standard(payload)) => {
                let body = Value::Structured(
                    serde_json::to_value(payload).expect("ErrorPayload is serializable"),
                );
                self.send_response(&ResponseHeader::CallErr { id }, body).await;
            }
            Err(HandlerError::Raw(value)) => {
                self.send_response(&ResponseHeader::CallErrObj { id }, value).await;
            }
            Ok(mut stream) => {
                let inner = self.clone();
                let task = tokio::spawn(async move {
                    while let Some(value) = stream.next().await {
                        inner.send_response(&ResponseHeader::EventFire { id }, value).await;
                    }
                });
                self.active.lock().insert(id, ActiveRequest::Subscription(task.abort_handle()));
            }
        }
    }

    async fn send_response(&self, header: &ResponseHeader, body: Value) {
        let frame = rapace_core::Frame::response(header, body);
        if let Err(err) = self.transport.send(frame).await {
            // Spec §7: a failed send is a soft drop on the server side;
            // log and continue serving other requests.
            warn!(?err, "failed to send response frame");
        }
    }
}

/// Convenience re-export used by `handle_frame` callers that classified a
/// raw header+body pair as belonging to the server side (spec §4.5).
pub type ServerJoinHandle = JoinHandle<()>;
