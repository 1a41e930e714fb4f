#![forbid(unsafe_code)]
//! RPC framework with an integrated service registry and a topic-based
//! publish/subscribe bus, all over the single framed protocol defined in
//! [`patchbay_wire`].
//!
//! The runtime splits into a handful of small engines:
//! - [`net`]: tokio TCP endpoints, with one reader task per connection
//!   draining the frame codec and one writer task fed by a non-blocking send
//!   handle.
//! - [`Dispatcher`]: routes each decoded message to the one handler
//!   registered for its kind, preserving the concrete message type.
//! - [`Requestor`]: correlates responses back to outstanding requests by id,
//!   for blocking, future, and callback call styles.
//! - [`Router`]: validates and executes RPC requests against registered
//!   [`ServiceDescriptor`]s.
//! - [`PdManager`] and [`PsManager`]: the registry and broker state machines.
//!
//! Applications normally use the facades: [`RpcServer`], [`RegistryServer`],
//! and [`TopicServer`] on the serving side; [`RpcClient`], [`RegistryClient`],
//! [`DiscoveryClient`], and [`TopicClient`] on the calling side.
//!
//! ```rust,no_run
//! use patchbay::{ClientConfig, RpcClient};
//! use serde_json::json;
//! # #[tokio::main]
//! # async fn main() -> Result<(), patchbay::PatchbayError> {
//! let client = RpcClient::direct("127.0.0.1:9090", ClientConfig::default()).await?;
//! let sum = client.call("Add", json!({ "num1": 90, "num2": 10 })).await?;
//! println!("{sum}");
//! # Ok(()) }
//! ```

mod broker;
mod client;
mod config;
mod dispatch;
mod error;
pub mod net;
mod registry;
mod requestor;
mod router;
mod server;

pub use broker::PsManager;
pub use client::{
    DiscoveryClient, OfflineCallback, PendingCall, RegistryClient, RpcClient, SubscribeCallback,
    TopicClient,
};
pub use config::{ClientConfig, EndpointConfig};
pub use dispatch::Dispatcher;
pub use error::PatchbayError;
pub use registry::PdManager;
pub use requestor::{PendingResponse, Requestor};
pub use router::{ParamKind, Router, ServiceDescriptor, ServiceDescriptorBuilder};
pub use server::{RegistryServer, RpcServer, TopicServer};

pub use patchbay_wire::{HostAddress, Message, ResponseCode};
