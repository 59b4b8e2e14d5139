//! Service registry and RPC correlation for ZoneGrid nodes.
//!
//! - [`Registry`]: locally exposed service objects, keyed by service type.
//! - [`RpcCorrelator`]: turns method calls into JSON-RPC 2.0 messages,
//!   resolves incoming requests against the registry or its callback-object
//!   table, and correlates responses with waiting callers.
//! - [`ServiceObject`] / [`CallbackObject`]: the dispatch-table model for
//!   everything reachable by remote invocation.

pub mod correlator;
pub mod registry;
pub mod service;

pub use correlator::{
    ErrorCallback, OutgoingRpc, PolicyCheck, ResultCallback, RpcCorrelator, RpcTransport,
};
pub use registry::{fingerprint, is_meta_service, Registry, RegistryWatcher, ServiceInfo};
pub use service::{
    method_fn, CallbackObject, CallerRef, EventListener, Responder, ServiceEvent, ServiceMethod,
    ServiceObject, ServiceRef,
};
