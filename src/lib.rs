//! `switchboard` is a bidirectional RPC middleware multiplexed over a
//! single WebSocket per client: unary calls, server-push streams, and
//! server-initiated calls into the client's own store all share one
//! connection, correlated by `rpcId` and addressed by `clientId`.
//!
//! The dispatch core ([`server::Switchboard`]) is transport-agnostic in the
//! same sense the original design is: [`transport`] is the one module that
//! knows about WebSockets, everything else operates purely on
//! [`wire::Event`] values and [`serde_json::Value`] payloads.

pub mod chunk;
pub mod client_store;
pub mod config;
pub mod context;
pub mod error;
pub mod facade;
pub mod router;
pub mod server;
pub mod session;
pub mod transform;
pub mod transport;
pub mod wire;

pub use error::RpcError;
pub use facade::RpcApi;
pub use server::{ServerConfig, Switchboard};
