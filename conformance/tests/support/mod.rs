//! Shared test fixtures: a connected `Connection` pair and a few small
//! `Channel` implementations reused across the suite.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use rapace::{CancelToken, Channel, ChannelServerConfig, Connection, Context, EventStream, HandlerError};
use rapace_core::{ErrorPayload, Stack, Value};
use rapace_transport::MemTransport;

/// Connect two peers over an in-process transport, symmetrically: each
/// side performs its own `Connection::connect` concurrently, the way two
/// real endpoints would.
pub async fn connect_pair() -> (Connection, Connection) {
    connect_pair_with(ChannelServerConfig::default()).await
}

pub async fn connect_pair_with(config: ChannelServerConfig) -> (Connection, Connection) {
    let (a, b) = MemTransport::pair();
    let (left, right) = tokio::join!(
        Connection::connect(Arc::new(a), Value::Text("left".into()), config.clone()),
        Connection::connect(Arc::new(b), Value::Text("right".into()), config),
    );
    (left.unwrap(), right.unwrap())
}

/// Echoes its argument back for `ping.echo`.
pub struct Echo;

#[async_trait]
impl Channel for Echo {
    async fn call(&self, _ctx: &Context, _method: &str, arg: Value, _cancel: CancelToken) -> Result<Value, HandlerError> {
        Ok(arg)
    }

    fn listen(&self, _ctx: &Context, event: &str, _arg: Value) -> Result<EventStream, HandlerError> {
        Err(HandlerError::unknown_event("ping", event))
    }
}

/// Every call fails with a fixed three-line stack (spec scenario S3).
pub struct Failing;

#[async_trait]
impl Channel for Failing {
    async fn call(&self, _ctx: &Context, _method: &str, _arg: Value, _cancel: CancelToken) -> Result<Value, HandlerError> {
        let payload = ErrorPayload::new("Error", "bad").with_stack(Stack::from_text("line1\nline2\nline3"));
        Err(HandlerError::Standard(payload))
    }

    fn listen(&self, _ctx: &Context, event: &str, _arg: Value) -> Result<EventStream, HandlerError> {
        Err(HandlerError::unknown_event("broken", event))
    }
}

/// Sleeps for a long time, observing cancellation cooperatively (spec
/// scenario S4).
pub struct Sleepy;

#[async_trait]
impl Channel for Sleepy {
    async fn call(&self, _ctx: &Context, _method: &str, arg: Value, mut cancel: CancelToken) -> Result<Value, HandlerError> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(arg),
            _ = cancel.cancelled() => Ok(arg),
        }
    }

    fn listen(&self, _ctx: &Context, event: &str, _arg: Value) -> Result<EventStream, HandlerError> {
        Err(HandlerError::unknown_event("slow", event))
    }
}

/// `sys.tick` produces `1, 2, 3, 4, ...` spaced a few milliseconds apart,
/// for subscription lifecycle tests.
pub struct Ticker;

#[async_trait]
impl Channel for Ticker {
    async fn call(&self, _ctx: &Context, method: &str, _arg: Value, _cancel: CancelToken) -> Result<Value, HandlerError> {
        Err(HandlerError::message("Unknown method", format!("sys has no method '{method}'")))
    }

    fn listen(&self, _ctx: &Context, event: &str, _arg: Value) -> Result<EventStream, HandlerError> {
        if event != "tick" {
            return Err(HandlerError::unknown_event("sys", event));
        }
        let stream = tokio_stream::iter(1..=1_000_000u64)
            .then(|n| async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                Value::int(n)
            });
        Ok(Box::pin(stream) as EventStream)
    }
}

/// Emits exactly `1..=count` then ends, with no delay between values.
pub struct CountingTicker(pub u64);

#[async_trait]
impl Channel for CountingTicker {
    async fn call(&self, _ctx: &Context, method: &str, _arg: Value, _cancel: CancelToken) -> Result<Value, HandlerError> {
        Err(HandlerError::message("Unknown method", format!("sys has no method '{method}'")))
    }

    fn listen(&self, _ctx: &Context, event: &str, _arg: Value) -> Result<EventStream, HandlerError> {
        if event != "tick" {
            return Err(HandlerError::unknown_event("sys", event));
        }
        let stream = tokio_stream::iter(1..=self.0).map(Value::int);
        Ok(Box::pin(stream) as EventStream)
    }
}

// Brought in for `Ticker::listen`'s `.then` combinator and
// `CountingTicker::listen`'s `.map`.
use tokio_stream::StreamExt as _;

#[allow(dead_code)]
pub type BoxedStream = Pin<Box<dyn Stream<Item = Value> + Send>>;
