//! # evbus-net
//!
//! Networked half of evbus: buses in different processes subscribe to each
//! other's topics over a small TCP RPC protocol.
//!
//! ### Key Submodules:
//! - `endpoint`: address + path identity of a bus
//! - `protocol`: `Register` / `PushEvent` / `Query` messages and framing
//! - `transport`: the `RpcClient` / `RpcService` seam and its TCP implementation
//! - `service`: the RPC surface over one `EventBus`
//! - `node`: `Bus` roles and lifecycle
//!
//! ```no_run
//! # async fn demo() -> Result<(), evbus_net::BusError> {
//! use evbus_net::{args, Bus, EventBus};
//!
//! let server = Bus::server(":2010", "/_server_bus_", EventBus::new());
//! server.start().await?;
//!
//! let client = Bus::client(":2015", "/_client_bus_", EventBus::new());
//! client.start().await?;
//! client
//!     .subscribe_remote("main:calculator", |a: i64, b: i64| println!("{}", a + b), &server.local_endpoint())
//!     .await?;
//!
//! server.event_bus().publish("main:calculator", args![20, 10]).await;
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod error;
pub mod node;
pub mod protocol;
pub mod service;
pub mod transport;

pub use endpoint::Endpoint;
pub use error::{BusError, TransportError};
pub use node::{values, Bus, BusState, Role};
pub use protocol::{Call, Method, RemoteError, RemoteErrorKind, RpcReply};
pub use service::Service;
pub use transport::{RpcClient, RpcListener, RpcService, TcpTransport};

pub use evbus_core::{args, EventBus, Out, PublishReport, Reply, SubscriptionId, Value};
