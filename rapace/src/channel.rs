//! The server-side `Channel` trait (spec §3/§4.3): a named handler exposing
//! `call` and `listen` over a per-connection context.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use rapace_core::{ErrorPayload, Value};

use crate::cancel::CancelToken;

/// The peer context token exchanged during the connection handshake
/// (spec §4.5, GLOSSARY "Context"), passed to every server-side
/// invocation. Applications interpret it; the core treats it opaquely.
pub type Context = Value;

/// A lazy sequence of event payloads produced by `Channel::listen`. Must
/// not do any work (subscribe to anything) until polled — see
/// `EventStream` callers in `ChannelServer`, which only start polling
/// once a `Subscribe` request actually arrives.
pub type EventStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// The error a handler produces when a call or subscribe fails.
///
/// Mirrors the two wire shapes in spec §4.3/§6: a thrown value with the
/// standard `{message, name, stack}` shape becomes `Standard` (wire
/// `CallErr`); anything else becomes `Raw` (wire `CallErrObj`), carried
/// through unmodified.
#[derive(Clone, Debug)]
pub enum HandlerError {
    Standard(ErrorPayload),
    Raw(Value),
}

impl HandlerError {
    pub fn message(name: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Standard(ErrorPayload::new(name, message))
    }

    /// The canonical error raised when `listen` is asked for an event
    /// name the channel does not expose. Spec §9 leaves the exact
    /// response open ("standardize this"); this workspace's decision
    /// (recorded in DESIGN.md) is to reuse the same `Standard` shape a
    /// failed `call` would use, named `Unknown event`.
    pub fn unknown_event(channel: &str, event: &str) -> Self {
        HandlerError::Standard(ErrorPayload::new(
            "Unknown event",
            format!("channel '{channel}' has no event '{event}'"),
        ))
    }
}

/// A named handler hosted by one side of a connection, exposing commands
/// (`call`) and event streams (`listen`) over a shared [`Context`].
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Invoke `method` with `arg`. `cancel` is cooperative: the handler
    /// may ignore it and still return a value.
    async fn call(
        &self,
        ctx: &Context,
        method: &str,
        arg: Value,
        cancel: CancelToken,
    ) -> Result<Value, HandlerError>;

    /// Begin producing a lazy sequence of values for `event`. Must not
    /// block or perform work beyond validating the event name and
    /// constructing the stream; the actual work of producing values
    /// starts only once the returned stream is polled.
    fn listen(&self, ctx: &Context, event: &str, arg: Value) -> Result<EventStream, HandlerError>;
}
