//! # zero - brokered RPC over ZeroMQ
//!
//! A server registers plain Rust functions as remote procedures. A broker
//! binds the public endpoint and spreads requests over a pool of workers;
//! clients call procedures by name with MessagePack-encoded arguments and
//! get typed results or typed errors back.
//!
//! ## Quick Start
//!
//! ### Server
//!
//! ```rust,ignore
//! use zero::{Contract, Result, ZeroServer};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Contract, Serialize, Deserialize)]
//! pub struct Order {
//!     pub id: u64,
//!     pub items: Vec<String>,
//! }
//!
//! fn echo(msg: String) -> Result<String> {
//!     Ok(msg)
//! }
//!
//! async fn total(order: Order) -> Result<usize> {
//!     Ok(order.items.len())
//! }
//!
//! fn main() -> Result<()> {
//!     zero::logging::init();
//!     let mut server = ZeroServer::new("0.0.0.0", 5559);
//!     server.register_rpc("echo", echo)?;
//!     server.register_async_rpc("total", total)?;
//!     server.run()
//! }
//! ```
//!
//! ### Clients
//!
//! ```rust,ignore
//! use zero::{AsyncZeroClient, Value, ZeroClient};
//!
//! let client = ZeroClient::new("localhost", 5559);
//! let reply: String = client.call("echo", "hello")?;
//!
//! // Inside a tokio runtime
//! let client = AsyncZeroClient::new("localhost", 5559);
//! let anything: Value = client.call("echo", "hello").await?;
//! ```
//!
//! Remote failures come back as [`Error::MethodNotFound`],
//! [`Error::RemoteException`] or [`Error::Validation`]; an unanswered call
//! fails with [`Error::Timeout`] after the client's deadline (2 s unless
//! configured).
//!
//! ## Generated clients
//!
//! Calling the reserved `get_rpc_contract` method with `(host, port)` returns
//! Rust source for a typed client of every registered handler, including the
//! records, enums and unions their signatures use.

// Lets `#[derive(Contract)]` output name `::zero` inside this crate too
extern crate self as zero;

pub mod broker;
pub mod client;
pub mod codegen;
pub mod config;
pub mod contract;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod logging;
pub mod registry;
pub mod server;
pub mod transport;
pub mod value;
pub mod worker;

#[cfg(test)]
mod tests;


// Re-exports
pub use broker::{Broker, BrokerHandle};
pub use client::{AsyncZeroClient, ZeroClient};
pub use config::{ClientConfig, ServerConfig, WorkerMode};
pub use contract::{Contract, Decimal, Field, ScalarType, TypeDescriptor};
pub use encoder::{Encoder, MsgPackEncoder};
pub use error::{Error, Result};
pub use frame::{RequestFrame, RequestId, ResponseFrame};
pub use registry::{AsyncHandler, RpcRegistry, SyncHandler};
pub use server::{ServerHandle, ZeroServer};
pub use value::Value;
pub use worker::{Dispatcher, FrameHandler, Worker, WorkerState};

// Re-export the derive when the feature is enabled
#[cfg(feature = "macros")]
pub use zero_macros::Contract;
