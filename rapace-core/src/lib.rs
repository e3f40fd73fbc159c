#![doc = include_str!("../README.md")]

mod error;
mod frame;
pub mod header;
pub mod value;

pub use error::{ErrorPayload, FramingError, Stack};
pub use frame::{Frame, MAX_FRAME_LEN};
pub use header::{RequestHeader, ResponseHeader};
pub use value::Value;

/// A request/response correlation id, scoped to the client that issued it.
///
/// Spec: ids are non-negative, monotonically increasing per client, and
/// never reused for the lifetime of a connection (`rapace-core` §3
/// invariant 1).
pub type RequestId = u64;

/// Upper (exclusive) bound for request ids, per spec §6 ("0 ≤ id < 2^31").
pub const ID_DOMAIN_LIMIT: u64 = 1 << 31;
