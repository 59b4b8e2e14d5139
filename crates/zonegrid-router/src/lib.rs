//! Message routing between ZoneGrid nodes.
//!
//! The [`Router`] owns the session table mapping logical address pairs to
//! next-hop identifiers, performs hierarchical multi-hop store-and-forward
//! delivery, and hands locally addressed payloads to the RPC correlator. It
//! knows nothing about the transport: outgoing bytes go through an injected
//! [`TransportSend`] implementation.

pub mod router;

pub use router::{Router, SessionEntry, TransportSend};
