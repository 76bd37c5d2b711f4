//! RPC transport to the node.
//!
//! Messages are JSON arrays `[type, request_id, method, payload, timestamp]`
//! multiplexed over one connection. [RpcClient] correlates responses with
//! requests by id, queues everything else as [Event]s and keeps the
//! connection alive with periodic pings.

pub mod api;
mod client;
mod error;
mod event;
mod message;
mod ws;


pub use client::{CloseCallback, RpcClient, KEEPALIVE_ID};
pub use error::{ConnectionError, ProtocolError, RpcError};
pub use event::Event;
pub use message::{ErrorPayload, Message, MessageType};
pub use ws::connect;

pub use api::{Method, RpcMethod};
