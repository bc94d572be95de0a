//! ## evbus-net::transport
//! **The RPC seam between buses**
//!
//! [`RpcClient`] issues one call to a remote endpoint; [`RpcService`] answers
//! calls arriving at a mounted path. The TCP implementations live in
//! [`tcp`] and [`listener`]; tests substitute in-memory clients.

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::protocol::{Call, RpcReply};

pub mod listener;
pub mod tcp;

pub use listener::RpcListener;
pub use tcp::TcpTransport;

#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(&self, endpoint: &Endpoint, call: Call) -> Result<RpcReply, TransportError>;
}

#[async_trait]
pub trait RpcService: Send + Sync {
    async fn dispatch(&self, call: Call) -> RpcReply;
}
