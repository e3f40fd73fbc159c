#![doc = include_str!("../README.md")]

pub mod cancel;
pub mod channel;
pub mod client;
pub mod connection;
pub mod proxy;
pub mod server;

pub use cancel::{cancel_pair, never_cancelled, CancelToken, Canceller};
pub use channel::{Channel, Context, EventStream, HandlerError};
pub use client::{CallError, ChannelClient, Subscription};
pub use connection::Connection;
pub use proxy::{classify_member, MemberKind, ProxyEvents, Reviver, ServiceProxy};
pub use server::{ChannelServer, ChannelServerConfig};
