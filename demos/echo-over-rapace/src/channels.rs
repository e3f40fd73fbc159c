//! The channels the "host" peer exposes.

use std::time::Duration;

use async_trait::async_trait;
use rapace::{CancelToken, Channel, Context, EventStream, HandlerError};
use rapace_core::Value;
use tokio_stream::StreamExt;

/// `ping.echo(arg)` returns `arg` unchanged.
pub struct Ping;

#[async_trait]
impl Channel for Ping {
    async fn call(&self, _ctx: &Context, method: &str, arg: Value, _cancel: CancelToken) -> Result<Value, HandlerError> {
        match method {
            "echo" => Ok(arg),
            other => Err(HandlerError::message("Unknown method", format!("ping has no method '{other}'"))),
        }
    }

    fn listen(&self, _ctx: &Context, event: &str, _arg: Value) -> Result<EventStream, HandlerError> {
        Err(HandlerError::unknown_event("ping", event))
    }
}

/// `sys.tick` emits an increasing counter every 200ms, forever.
pub struct Sys;

#[async_trait]
impl Channel for Sys {
    async fn call(&self, _ctx: &Context, method: &str, _arg: Value, _cancel: CancelToken) -> Result<Value, HandlerError> {
        Err(HandlerError::message("Unknown method", format!("sys has no method '{method}'")))
    }

    fn listen(&self, _ctx: &Context, event: &str, _arg: Value) -> Result<EventStream, HandlerError> {
        if event != "tick" {
            return Err(HandlerError::unknown_event("sys", event));
        }
        let stream = tokio_stream::iter(1u64..).then(|n| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Value::int(n)
        });
        Ok(Box::pin(stream) as EventStream)
    }
}
