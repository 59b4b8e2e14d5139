//! Transport-level message envelope.
//!
//! Every frame exchanged between zone nodes is one [`Envelope`]. The field
//! names (`type`, `register`, `to`, `from`, `resp_to`, `payload`) are a
//! compatibility surface with unmigrated peers and must not change.

use crate::rpc::RpcMessage;
use serde::{Deserialize, Serialize};

/// Value of the `type` field for JSON-RPC payloads.
pub const MSG_TYPE_JSONRPC: &str = "JSONRPC";

fn is_false(b: &bool) -> bool {
    !*b
}

/// The routed message envelope.
///
/// `resp_to` names the address that should receive the RPC reply; when it
/// equals `to` the payload is a terminal response for the receiving node
/// rather than something to forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub register: bool,
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_to: Option<String>,
    #[serde(default)]
    pub payload: Option<RpcMessage>,
}

impl Envelope {
    /// True when the payload is addressed back to `to` itself, i.e. the
    /// envelope carries a terminal response rather than a relayed request.
    pub fn is_terminal_response(&self) -> bool {
        self.resp_to.as_deref() == Some(self.to.as_str())
    }
}
