//! Core types for the ZoneGrid personal-zone messaging platform.
//!
//! This crate defines the data model shared by the service registry, the RPC
//! correlator, and the message router: zone addresses, the transport envelope
//! exchanged between nodes, and the JSON-RPC 2.0 payload types. It contains
//! no business logic.

pub mod address;
pub mod envelope;
pub mod error;
pub mod rpc;

pub use envelope::{Envelope, MSG_TYPE_JSONRPC};
pub use error::{ZoneGridError, ZoneGridResult};
pub use rpc::{RpcError, RpcMessage, JSONRPC_VERSION};
