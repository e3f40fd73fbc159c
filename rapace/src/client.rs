//! The Channel Client (C4, spec §4.4): issues `Call`/`Subscribe` requests,
//! correlates responses by id, and turns a local cancellation into a wire
//! `Cancel`/`Unsubscribe` only if the request already made it onto the wire.
//!
//! A client is born *Uninitialized*; any request issued before the peer's
//! `Initialize` arrives is queued on a one-shot signal rather than sent
//! immediately (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rapace_core::header::{RequestHeader, ResponseHeader};
use rapace_core::{ErrorPayload, RequestId, Value};
use rapace_transport::{Transport, TransportError};
use tokio::sync::{mpsc, oneshot, watch, Notify};

use crate::cancel::CancelToken;

/// Why a `call()` did not produce a success value.
#[derive(Clone, Debug)]
pub enum CallError {
    /// The caller's own [`CancelToken`] fired before a terminal response
    /// arrived (spec §4.4: cancellation settles the local future
    /// immediately, independent of whatever the server ends up doing).
    Cancelled,
    /// The peer replied `CallErr` with the standard `{message, name,
    /// stack}` shape.
    Handler(ErrorPayload),
    /// The peer replied `CallErrObj` with an arbitrary payload.
    HandlerObj(Value),
    /// The transport failed before a response arrived, or the connection
    /// was disposed while the request was still outstanding.
    Transport(TransportError),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Cancelled => write!(f, "call was cancelled"),
            CallError::Handler(payload) => write!(f, "{}: {}", payload.name, payload.message),
            CallError::HandlerObj(_) => write!(f, "call failed with a non-standard error payload"),
            CallError::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

impl std::error::Error for CallError {}

enum PendingHandler {
    Call(oneshot::Sender<CallOutcome>),
    Subscription(mpsc::UnboundedSender<Value>),
}

type CallOutcome = Result<Value, CallError>;

/// Tri-state life cycle of a not-yet-dispatched outgoing request,
/// coordinating the queued-dispatch task against a concurrent local
/// disposal (spec §4.4: "if the caller cancels while still queued, the
/// queued dispatch is dropped without hitting the wire; if it already has,
/// send the wire counterpart").
const NOT_SENT: u8 = 0;
const SENT: u8 = 1;
const CANCELLED: u8 = 2;

struct Inner {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingHandler>>,
    /// Uninitialized until the peer's `Initialize` frame is observed
    /// (spec §4.4); `call`/`listen` queue their send on this signal.
    initialized: watch::Receiver<bool>,
    initialized_tx: watch::Sender<bool>,
    /// Set once by `dispose()`. Checked up front by `call`/`listen` so
    /// that operations issued *after* disposal fail immediately (spec
    /// §4.4 step 1, §7 "Disposed: operations on a disposed client fail
    /// with Cancelled") instead of spawning a dispatch task that would
    /// wait forever on `disposed.notified()` — `Notify::notify_waiters`
    /// only wakes tasks already waiting at the moment it fires, it is not
    /// a sticky permit like `notify_one`'s.
    disposed_flag: AtomicBool,
    /// Notified on `dispose()`, so a dispatch task already queued on
    /// `initialized` (a transport that never completes its handshake)
    /// wakes up and observes `disposed_flag` instead of leaking forever.
    disposed: Notify,
}

/// The client half of a connection (spec §4.4).
pub struct ChannelClient {
    inner: Arc<Inner>,
}

impl ChannelClient {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let (initialized_tx, initialized) = watch::channel(false);
        Arc::new(ChannelClient {
            inner: Arc::new(Inner {
                transport,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                initialized,
                initialized_tx,
                disposed_flag: AtomicBool::new(false),
                disposed: Notify::new(),
            }),
        })
    }

    /// Whether [`ChannelClient::dispose`] has already run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed_flag.load(Ordering::Acquire)
    }

    fn alloc_id(&self) -> RequestId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        // Ids are allocated locally, never from wire input, so exceeding
        // the spec §6 domain is this client's own bug (billions of calls
        // on one connection), not something a peer can trigger.
        debug_assert!(id < rapace_core::ID_DOMAIN_LIMIT, "request id {id} exceeds the spec §6 domain");
        id
    }

    /// Issue a `Call` and await its terminal response, racing the
    /// caller-supplied cancellation (spec §4.4, §5).
    pub async fn call(
        &self,
        channel: impl Into<String>,
        method: impl Into<String>,
        arg: Value,
        mut cancel: CancelToken,
    ) -> CallOutcome {
        // Spec §4.4 step 1, §7: "operations on a disposed client fail with
        // Cancelled" — checked before anything is allocated or queued.
        if self.is_disposed() {
            return Err(CallError::Cancelled);
        }
        let id = self.alloc_id();
        let channel = channel.into();
        let method = method.into();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, PendingHandler::Call(tx));

        let frame = rapace_core::Frame::request(
            &RequestHeader::Call {
                id,
                channel: channel.clone(),
                method,
            },
            arg,
        );
        let (state, send_task) = self.inner.clone().spawn_queued_dispatch(frame);

        tokio::select! {
            outcome = rx => {
                outcome.unwrap_or(Err(CallError::Transport(TransportError::Closed)))
            }
            _ = cancel.cancelled() => {
                self.inner.pending.lock().remove(&id);
                if state
                    .compare_exchange(NOT_SENT, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // Won the race: the queued dispatch never touches the wire.
                    send_task.abort();
                } else {
                    // The request already hit the wire; tell the peer.
                    let frame = rapace_core::Frame::request(&RequestHeader::Cancel { id }, Value::Absent);
                    let _ = self.inner.transport.send(frame).await;
                }
                Err(CallError::Cancelled)
            }
        }
    }

    /// Issue a `Subscribe` and return a live subscription. The `Subscribe`
    /// itself is queued the same way `call` queues its `Call` (spec
    /// §4.4); `Unsubscribe` is sent on drop, unless the subscription is
    /// dropped before its queued `Subscribe` ever reached the wire, in
    /// which case nothing is sent either way.
    pub fn listen(&self, channel: impl Into<String>, event: impl Into<String>, arg: Value) -> Subscription {
        let id = self.alloc_id();
        let (tx, rx) = mpsc::unbounded_channel();

        // Spec §4.4 step 1, §7: a disposed client rejects new operations
        // immediately rather than queuing a `Subscribe` that would never
        // reach the wire. `listen` has no `Result` to reject with, so the
        // returned `Subscription` is born already settled: no frame is
        // ever sent, and `next()` resolves `None` right away.
        if self.is_disposed() {
            drop(tx);
            return Subscription {
                id,
                rx,
                state: Arc::new(AtomicU8::new(CANCELLED)),
                send_task: tokio::spawn(async {}),
                inner: self.inner.clone(),
            };
        }

        self.inner.pending.lock().insert(id, PendingHandler::Subscription(tx));

        let frame = rapace_core::Frame::request(
            &RequestHeader::Subscribe {
                id,
                channel: channel.into(),
                event: event.into(),
            },
            arg,
        );
        let (state, send_task) = self.inner.clone().spawn_queued_dispatch(frame);

        Subscription {
            id,
            rx,
            state,
            send_task,
            inner: self.inner.clone(),
        }
    }

    /// Route one incoming response frame to its pending request.
    pub fn handle_frame(&self, header: ResponseHeader, body: Value) {
        match header {
            ResponseHeader::Initialize => {
                let _ = self.inner.initialized_tx.send(true);
            }
            ResponseHeader::CallOk { id } => self.resolve_call(id, Ok(body)),
            ResponseHeader::CallErr { id } => {
                let payload = body
                    .as_json()
                    .and_then(|json| serde_json::from_value::<ErrorPayload>(json.clone()).ok());
                let outcome = match payload {
                    Some(payload) => Err(CallError::Handler(payload)),
                    None => Err(CallError::HandlerObj(body)),
                };
                self.resolve_call(id, outcome);
            }
            ResponseHeader::CallErrObj { id } => self.resolve_call(id, Err(CallError::HandlerObj(body))),
            ResponseHeader::EventFire { id } => {
                // A residual EventFire arriving after Unsubscribe finds no
                // pending row and is silently dropped (spec §5). A peer
                // that sends EventFire for an id it never subscribed is a
                // protocol violation, not a local invariant break — drop
                // it the same way rather than trusting wire input enough
                // to panic on it.
                let handler = self.inner.pending.lock().get(&id).and_then(|h| match h {
                    PendingHandler::Subscription(tx) => Some(tx.clone()),
                    PendingHandler::Call(_) => None,
                });
                if let Some(tx) = handler {
                    let _ = tx.send(body);
                }
            }
        }
    }

    fn resolve_call(&self, id: RequestId, outcome: CallOutcome) {
        if let Some(PendingHandler::Call(tx)) = self.inner.pending.lock().remove(&id) {
            let _ = tx.send(outcome);
        }
    }

    /// Mark the client disposed, settle every pending call with
    /// [`CallError::Cancelled`], drop every subscription sender, and wake
    /// any dispatch task still queued on initialization (spec §5
    /// "Disposal": "disposes every active cancel sink (causing in-flight
    /// calls to settle as cancelled)"; §7: "Disposed: operations on a
    /// disposed client fail with Cancelled"). The flag is set first so that
    /// any `call`/`listen` racing this on another task sees it and bails
    /// out immediately rather than queuing new work.
    pub fn dispose(&self) {
        self.inner.disposed_flag.store(true, Ordering::Release);
        let pending = std::mem::take(&mut *self.inner.pending.lock());
        for (_, handler) in pending {
            if let PendingHandler::Call(tx) = handler {
                let _ = tx.send(Err(CallError::Cancelled));
            }
        }
        self.inner.disposed.notify_waiters();
    }
}

impl Inner {
    /// Spawn the task that waits for `initialized` (resolving immediately
    /// if already set) and then sends `frame`, unless a concurrent
    /// cancellation/drop claims the row first via the returned state atomic.
    fn spawn_queued_dispatch(self: Arc<Self>, frame: rapace_core::Frame) -> (Arc<AtomicU8>, tokio::task::JoinHandle<()>) {
        let state = Arc::new(AtomicU8::new(NOT_SENT));
        let send_state = state.clone();
        let mut initialized = self.initialized.clone();
        let inner = self.clone();
        let task = tokio::spawn(async move {
            // `disposed_flag` may already be set by the time this task
            // starts running (dispose() racing the spawn itself); check it
            // up front since the `disposed.notified()` branch below only
            // wakes a task that is already waiting, not one that arrives
            // after the notification fired.
            if inner.disposed_flag.load(Ordering::Acquire) {
                return;
            }
            tokio::select! {
                result = initialized.wait_for(|ready| *ready) => {
                    if result.is_err() {
                        return; // sender dropped: the client itself is gone.
                    }
                }
                _ = inner.disposed.notified() => return,
            }
            if send_state
                .compare_exchange(NOT_SENT, SENT, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return; // a concurrent cancel/drop already claimed this row.
            }
            let _ = inner.transport.send(frame).await;
        });
        (state, task)
    }
}

/// A live event subscription. Sends `Unsubscribe` on drop once its
/// `Subscribe` actually reached the wire (spec §4.4, §3 invariant: "exactly
/// one Subscribe, exactly one Unsubscribe").
pub struct Subscription {
    id: RequestId,
    rx: mpsc::UnboundedReceiver<Value>,
    state: Arc<AtomicU8>,
    send_task: tokio::task::JoinHandle<()>,
    inner: Arc<Inner>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
        match self.state.compare_exchange(NOT_SENT, CANCELLED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // Still queued: drop it without ever touching the wire.
                self.send_task.abort();
            }
            Err(SENT) => {
                let id = self.id;
                let transport = self.inner.transport.clone();
                tokio::spawn(async move {
                    let frame = rapace_core::Frame::request(&RequestHeader::Unsubscribe { id }, Value::Absent);
                    let _ = transport.send(frame).await;
                });
            }
            Err(_) => {
                // Already CANCELLED (e.g. the client was disposed when
                // this subscription was created): the Subscribe never
                // reached the wire, so there is nothing left to tear down.
                self.send_task.abort();
            }
        }
    }
}
