//! Session-table router.
//!
//! Addresses are hierarchical (`user@zone/device/app`). A route between two
//! endpoints exists only after a register message (or a locally-initiated
//! registration) and is stored directionally under the key
//! `"<from>-><to>"`. Forwarding prefers an exact session match and otherwise
//! falls back hierarchically: the destination is shortened segment by segment
//! from the right until a registered prefix is found, and failing that the
//! message goes to the top-level segment of this node's own address — the
//! home coordinator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};
use zonegrid_rpc::{RpcCorrelator, RpcTransport};
use zonegrid_types::address::{depth_below, proper_prefixes, top_segment, DEFAULT_SEPARATOR};
use zonegrid_types::{Envelope, RpcMessage, ZoneGridError, ZoneGridResult, MSG_TYPE_JSONRPC};

/// Transport-send function injected by the hosting process. The router does
/// not know whether the next hop is a socket, a websocket, or an in-process
/// channel.
#[async_trait]
pub trait TransportSend: Send + Sync {
    async fn send(&self, message: Envelope, next_hop: &str) -> ZoneGridResult<()>;
}

/// One directional routing entry.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Next-hop identifier: the `from` address of the register message, or
    /// the raw session id of a directly connected peer.
    pub next_hop: String,
    pub established_at: DateTime<Utc>,
}

/// Mutable routing state, guarded as one unit so that a multi-hop resolution
/// observes a consistent table snapshot.
struct RouterState {
    own_address: String,
    separator: char,
    sessions: HashMap<String, SessionEntry>,
    /// Local sub-entities known to have disconnected; traffic to them is
    /// dropped instead of forwarded into a dead route.
    disconnected_locals: HashSet<String>,
}

enum RouteDecision {
    Next(String),
    DropDeadLocal,
}

fn session_key(from: &str, to: &str) -> String {
    format!("{from}->{to}")
}

impl RouterState {
    fn has_session(&self, a: &str, b: &str) -> bool {
        self.sessions.contains_key(&session_key(a, b))
            || self.sessions.contains_key(&session_key(b, a))
    }

    /// Next hop for `to`: exact session match preferred, hierarchical
    /// fallback otherwise, with the dead-local-route check applied before
    /// any fallback forward.
    fn resolve(&self, to: &str) -> RouteDecision {
        if let Some(entry) = self.sessions.get(&session_key(&self.own_address, to)) {
            return RouteDecision::Next(entry.next_hop.clone());
        }
        if let Some(entry) = self.sessions.get(&session_key(to, &self.own_address)) {
            return RouteDecision::Next(entry.next_hop.clone());
        }

        // no session either way
        if self.is_dead_local(to) {
            return RouteDecision::DropDeadLocal;
        }
        RouteDecision::Next(self.home_fallback(to))
    }

    /// Longest registered prefix of `to`, else the top segment of the own
    /// address (the home coordinator).
    fn home_fallback(&self, to: &str) -> String {
        let first = top_segment(to, self.separator).to_string();
        let mut forward_to = first.clone();

        for prefix in proper_prefixes(to, self.separator) {
            if prefix == first {
                continue;
            }
            if self.has_session(&prefix, &self.own_address) {
                forward_to = prefix;
            }
        }

        if forward_to == first && !self.has_session(&first, &self.own_address) {
            let own_top = top_segment(&self.own_address, self.separator);
            if forward_to != own_top {
                forward_to = own_top.to_string();
            }
        }
        forward_to
    }

    /// A destination below this node that can no longer be reached: either
    /// explicitly marked disconnected, or an app-level sub-address (two or
    /// more segments under the own address) with no session of its own.
    fn is_dead_local(&self, to: &str) -> bool {
        if self.disconnected_locals.contains(to) {
            return true;
        }
        if !self.own_address.contains(self.separator) {
            return false;
        }
        matches!(
            depth_below(to, &self.own_address, self.separator),
            Some(depth) if depth >= 2
        )
    }

    fn note_disconnected(&mut self, endpoint: &str) {
        if endpoint != self.own_address
            && depth_below(endpoint, &self.own_address, self.separator).is_some()
        {
            self.disconnected_locals.insert(endpoint.to_string());
        }
    }
}

/// Routes messages between addressed entities: hub, proxies, and their
/// hosted apps. Locally addressed payloads are delivered to the RPC
/// correlator; everything else is forwarded, possibly over multiple hops.
pub struct Router {
    correlator: Arc<RpcCorrelator>,
    state: Mutex<RouterState>,
    transport: RwLock<Option<Arc<dyn TransportSend>>>,
}

impl Router {
    /// Create a router and bind it as the correlator's write half.
    pub fn new(correlator: Arc<RpcCorrelator>) -> Arc<Self> {
        let router = Arc::new(Self {
            correlator: Arc::clone(&correlator),
            state: Mutex::new(RouterState {
                own_address: String::new(),
                separator: DEFAULT_SEPARATOR,
                sessions: HashMap::new(),
                disconnected_locals: HashSet::new(),
            }),
            transport: RwLock::new(None),
        });
        correlator.set_transport(router.clone());
        router
    }

    /// Install the transport-send function.
    pub fn set_send(&self, transport: Arc<dyn TransportSend>) {
        let mut slot = self.transport.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(transport);
    }

    pub fn set_own_address(&self, address: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.own_address = address.into();
    }

    pub fn own_address(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.own_address.clone()
    }

    /// Separator between address segments, `/` by default.
    pub fn set_separator(&self, separator: char) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.separator = separator;
    }

    /// Build a register message. Sent to an entity, it sets up a session on
    /// the receiver side so the receiver routes messages back to `from`.
    /// Registering with oneself is a caller bug.
    pub fn create_register_message(&self, from: &str, to: &str) -> ZoneGridResult<Envelope> {
        debug!(from = %from, to = %to, "Creating register message");
        if from == to {
            return Err(ZoneGridError::SelfRegistration(from.to_string()));
        }
        Ok(Envelope {
            kind: Some(MSG_TYPE_JSONRPC.to_string()),
            id: None,
            register: true,
            to: to.to_string(),
            from: Some(from.to_string()),
            resp_to: None,
            payload: None,
        })
    }

    /// Remove a stored session route. Idempotent. Endpoints under this
    /// node's own address are remembered as disconnected so later traffic to
    /// them is dropped instead of forwarded.
    pub fn remove_route(&self, sender: &str, receiver: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sessions.remove(&session_key(sender, receiver));
        state.note_disconnected(sender);
        state.note_disconnected(receiver);
    }

    /// Tear down every route whose next hop is `next_hop`. Transport
    /// adapters call this when a connection closes — the router itself never
    /// infers teardown from message traffic. Returns the number of routes
    /// removed.
    pub fn remove_routes_via(&self, next_hop: &str) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, entry)| entry.next_hop == next_hop)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.sessions.remove(key);
            if let Some((sender, receiver)) = key.split_once("->") {
                let (sender, receiver) = (sender.to_string(), receiver.to_string());
                state.note_disconnected(&sender);
                state.note_disconnected(&receiver);
            }
        }
        keys.len()
    }

    /// Record a local sub-entity as disconnected.
    pub fn mark_local_disconnected(&self, address: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.note_disconnected(address);
    }

    /// Clear a local sub-entity's disconnected marker.
    pub fn mark_local_connected(&self, address: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.disconnected_locals.remove(address);
    }

    /// True when the directional session `sender -> receiver` exists.
    pub fn has_route(&self, sender: &str, receiver: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sessions.contains_key(&session_key(sender, receiver))
    }

    pub fn session_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sessions.len()
    }

    /// Entry point for every received message. Register messages create
    /// session entries; messages for other nodes are forwarded; locally
    /// addressed payloads go to the RPC correlator.
    pub async fn on_message_received(&self, message: Envelope, session_id: Option<&str>) {
        if message.register {
            if message.to.is_empty() {
                return;
            }
            let from = message.from.clone().unwrap_or_default();
            let next_hop = if !from.is_empty() {
                from.clone()
            } else if let Some(session_id) = session_id {
                session_id.to_string()
            } else {
                debug!(to = %message.to, "Register message without sender or session id");
                return;
            };

            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.sessions.insert(
                session_key(&from, &message.to),
                SessionEntry {
                    next_hop,
                    established_at: Utc::now(),
                },
            );
            // a re-registering entity is live again
            state.disconnected_locals.remove(&from);
            info!(from = %from, to = %message.to, "Registered route");
            return;
        }

        if message.to.is_empty() {
            return;
        }

        if message.to != self.own_address() {
            self.forward(message).await;
            return;
        }

        // addressed to this node
        let Some(payload) = message.payload.clone() else {
            return;
        };
        if !message.is_terminal_response() {
            // request/response relayed on behalf of a distinct originator
            self.correlator
                .handle_message(payload, message.from.clone())
                .await;
        } else if payload.is_request() {
            self.correlator
                .handle_message(payload, message.from.clone())
                .await;
        } else if payload.is_response() {
            // terminal response: pure response resolution, no sender
            self.correlator.handle_message(payload, None).await;
        }
        // anything else is ignored
    }

    async fn forward(&self, message: Envelope) {
        let decision = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.resolve(&message.to)
        };
        match decision {
            RouteDecision::Next(next_hop) => {
                debug!(to = %message.to, next_hop = %next_hop, "Forwarding message");
                if let Err(error) = self.send_via_transport(message, &next_hop).await {
                    warn!(error = %error, "Failed to forward message");
                }
            }
            RouteDecision::DropDeadLocal => {
                debug!(to = %message.to, "Dropping message, local app disconnected");
            }
        }
    }

    async fn send_via_transport(&self, message: Envelope, next_hop: &str) -> ZoneGridResult<()> {
        let transport = {
            let slot = self.transport.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        match transport {
            Some(transport) => transport.send(message, next_hop).await,
            None => Err(ZoneGridError::Transport(
                "transport send function not installed".to_string(),
            )),
        }
    }
}

#[async_trait]
impl RpcTransport for Router {
    /// Wrap an RPC in a transport envelope and send it towards `to`, using
    /// the same next-hop resolution as forwarding.
    async fn write(&self, rpc: RpcMessage, to: Option<&str>) -> ZoneGridResult<()> {
        let to = to.ok_or(ZoneGridError::MissingDestination)?;
        let own = self.own_address();
        let message = Envelope {
            // the payload is a JSON-RPC object
            kind: Some(MSG_TYPE_JSONRPC.to_string()),
            id: None,
            register: false,
            to: to.to_string(),
            from: Some(own.clone()),
            resp_to: Some(own),
            payload: Some(rpc),
        };

        let decision = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.resolve(to)
        };
        match decision {
            RouteDecision::Next(next_hop) => self.send_via_transport(message, &next_hop).await,
            RouteDecision::DropDeadLocal => {
                debug!(to = %to, "Dropping message, local app disconnected");
                Ok(())
            }
        }
    }
}
