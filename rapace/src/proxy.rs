//! The Service Proxy (C8, spec §4.8): an optional convenience layer
//! mapping a typed service object's members onto `ChannelClient` calls and
//! subscriptions, with a pluggable reviver hook for payload rehydration.
//!
//! The source this is adapted from reflects over an object's property
//! names at runtime (`on<Uppercase>…` is an event, `onDynamic<Uppercase>…`
//! a function returning an event, everything else a command). Rust has no
//! such runtime reflection, so [`classify_member`] exposes the same naming
//! rule as a pure function: callers (typically generated code) apply it to
//! their own member names to decide whether to route through
//! [`ServiceProxy::call`] or [`ServiceProxy::listen`].

use std::sync::Arc;

use rapace_core::Value;

use crate::cancel::CancelToken;
use crate::client::{CallError, ChannelClient, Subscription};

/// Which wire operation a service member name maps to (spec §4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    /// `on<Uppercase>…`: a plain event, subscribed with no argument logic
    /// beyond what the caller supplies.
    Event,
    /// `onDynamic<Uppercase>…`: a function that returns an event, i.e. a
    /// `listen` whose argument is computed by the caller.
    DynamicEvent,
    /// Everything else: a `call`.
    Command,
}

/// Classify a service member name per the naming rule in spec §4.8.
pub fn classify_member(name: &str) -> MemberKind {
    if let Some(rest) = name.strip_prefix("onDynamic") {
        if starts_with_uppercase(rest) {
            return MemberKind::DynamicEvent;
        }
    }
    if let Some(rest) = name.strip_prefix("on") {
        if starts_with_uppercase(rest) {
            return MemberKind::Event;
        }
    }
    MemberKind::Command
}

fn starts_with_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_uppercase())
}

/// A pure transformation applied to decoded values on the consumer side to
/// rehydrate well-known structured types (spec §9: "Dynamic typing of
/// payloads"). Disabled per proxy by simply not calling
/// [`ServiceProxy::with_reviver`].
pub type Reviver = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A reflective binding between a channel and a consumer-side service
/// object (spec §4.8). Thin wrapper over [`ChannelClient`]: callers
/// classify their own member names with [`classify_member`] and route
/// accordingly.
#[derive(Clone)]
pub struct ServiceProxy {
    client: Arc<ChannelClient>,
    channel: String,
    reviver: Option<Reviver>,
}

impl ServiceProxy {
    pub fn new(client: Arc<ChannelClient>, channel: impl Into<String>) -> Self {
        ServiceProxy {
            client,
            channel: channel.into(),
            reviver: None,
        }
    }

    /// Install a reviver applied to every value returned by [`call`] and
    /// every event produced by a [`listen`]-returned [`ProxyEvents`].
    pub fn with_reviver(mut self, reviver: Reviver) -> Self {
        self.reviver = Some(reviver);
        self
    }

    /// Invoke a command member (spec §4.8: "all other function properties
    /// are commands").
    pub async fn call(&self, method: &str, arg: Value, cancel: CancelToken) -> Result<Value, CallError> {
        let value = self.client.call(self.channel.clone(), method, arg, cancel).await?;
        Ok(self.revive(value))
    }

    /// Subscribe to an event or dynamic-event member (spec §4.8: both
    /// `on<Uppercase>…` and `onDynamic<Uppercase>…` issue the same wire
    /// `Subscribe`; the distinction is purely how the consumer-side member
    /// is shaped, not anything the wire sees).
    pub fn listen(&self, event: &str, arg: Value) -> ProxyEvents {
        let subscription = self.client.listen(self.channel.clone(), event, arg);
        ProxyEvents {
            subscription,
            reviver: self.reviver.clone(),
        }
    }

    fn revive(&self, value: Value) -> Value {
        match &self.reviver {
            Some(reviver) => reviver(value),
            None => value,
        }
    }
}

/// The event stream returned by [`ServiceProxy::listen`], applying the
/// proxy's reviver (if any) to each payload.
pub struct ProxyEvents {
    subscription: Subscription,
    reviver: Option<Reviver>,
}

impl ProxyEvents {
    pub async fn next(&mut self) -> Option<Value> {
        let value = self.subscription.next().await?;
        Some(match &self.reviver {
            Some(reviver) => reviver(value),
            None => value,
        })
    }
}
