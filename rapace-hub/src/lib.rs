#![doc = include_str!("../README.md")]

pub mod hub;
pub mod router;

pub use hub::{ConnectionEvent, ConnectionHub, ConnectionId};
pub use router::{Filter, FilteredChannel, MultiplexedEvents, Predicate, RoutedChannel, Router, StaticRouter};
