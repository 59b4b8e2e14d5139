//! RPC correlator.
//!
//! Builds and parses JSON-RPC 2.0 messages, resolves incoming requests to a
//! local target (registry service or callback object), tracks outstanding
//! requests awaiting a response, and hands outgoing messages to the installed
//! transport — normally the message router.

use crate::registry::{is_meta_service, Registry};
use crate::service::{CallbackObject, CallerRef, Responder, ServiceRef};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use zonegrid_types::rpc::{id_key, next_message_id, RpcError, RpcMessage};
use zonegrid_types::{ZoneGridError, ZoneGridResult};

/// Callback invoked with the `result` of a resolved request.
pub type ResultCallback = Box<dyn FnOnce(Value) + Send + Sync>;

/// Callback invoked with the `error.data` of a failed request.
pub type ErrorCallback = Box<dyn FnOnce(Option<Value>) + Send + Sync>;

/// Write half consumed by the correlator. Normally satisfied by the message
/// router; replaceable for direct in-process dispatch.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn write(&self, rpc: RpcMessage, to: Option<&str>) -> ZoneGridResult<()>;
}

/// Asynchronous authorization gate evaluated before an incoming RPC is
/// dispatched. Handling suspends until the verdict resolves; no timeout is
/// enforced at this layer, so bounded-latency callers must enforce one inside
/// their implementation.
#[async_trait]
pub trait PolicyCheck: Send + Sync {
    async fn check(&self, rpc: &RpcMessage, from: Option<&str>) -> bool;
}

/// An outgoing request built by [`RpcCorrelator::create_rpc`].
#[derive(Debug, Clone)]
pub struct OutgoingRpc {
    pub message: RpcMessage,
    /// Explicit destination; overrides the default reply-path destination in
    /// [`RpcCorrelator::execute_rpc`].
    pub service_address: Option<String>,
}

impl OutgoingRpc {
    pub fn from_message(message: RpcMessage) -> Self {
        Self {
            message,
            service_address: None,
        }
    }

    /// The message id, present from creation on.
    pub fn id(&self) -> Option<&Value> {
        self.message.id.as_ref()
    }
}

/// Single-shot entry waiting for the response matching its request id.
struct PendingRequest {
    on_result: Option<ResultCallback>,
    on_error: Option<ErrorCallback>,
}

/// Correlates JSON-RPC traffic for one node.
pub struct RpcCorrelator {
    registry: Arc<Registry>,
    session_id: RwLock<String>,
    /// Requests awaiting their single response, keyed by RPC id.
    pending: DashMap<String, PendingRequest>,
    /// Long-lived callback objects, keyed by their registration id.
    callbacks: DashMap<String, Arc<CallbackObject>>,
    policy: RwLock<Option<Arc<dyn PolicyCheck>>>,
    transport: RwLock<Option<Arc<dyn RpcTransport>>>,
}

impl RpcCorrelator {
    pub fn new(registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            session_id: RwLock::new(String::new()),
            pending: DashMap::new(),
            callbacks: DashMap::new(),
            policy: RwLock::new(None),
            transport: RwLock::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Install the writer used for outgoing messages.
    pub fn set_transport(&self, transport: Arc<dyn RpcTransport>) {
        let mut slot = self.transport.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(transport);
    }

    /// Install the policy-check hook. Without one every RPC is allowed.
    pub fn set_policy_check(&self, policy: Arc<dyn PolicyCheck>) {
        let mut slot = self.policy.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(policy);
    }

    pub fn set_session_id(&self, id: impl Into<String>) {
        let mut session_id = self.session_id.write().unwrap_or_else(|e| e.into_inner());
        *session_id = id.into();
    }

    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Build a JSON-RPC request for `method` on the referenced target.
    ///
    /// An empty service or method is a caller programming error and fails
    /// immediately.
    pub fn create_rpc(
        &self,
        service: &ServiceRef,
        method: &str,
        params: Value,
    ) -> ZoneGridResult<OutgoingRpc> {
        if method.is_empty() {
            return Err(ZoneGridError::MissingMethod);
        }

        let (rpc_method, service_address) = match service {
            ServiceRef::Service { api, id, address } => {
                if api.is_empty() {
                    return Err(ZoneGridError::MissingService);
                }
                (format!("{api}@{id}.{method}"), address.clone())
            }
            ServiceRef::Callback { rpc_id, from } => {
                if rpc_id.is_empty() {
                    return Err(ZoneGridError::MissingService);
                }
                (format!("{rpc_id}.{method}"), from.clone())
            }
            ServiceRef::Named(name) => {
                if name.is_empty() {
                    return Err(ZoneGridError::MissingService);
                }
                (format!("{name}.{method}"), None)
            }
        };

        Ok(OutgoingRpc {
            message: RpcMessage::request(
                Some(Value::String(next_message_id())),
                rpc_method,
                params,
            ),
            service_address,
        })
    }

    /// Send an RPC, registering the optional callbacks for its response.
    ///
    /// An explicit `service_address` on the request overrides `from` as the
    /// destination. The final write is delegated to the installed transport;
    /// with none installed the call is logged and dropped.
    pub async fn execute_rpc(
        &self,
        rpc: OutgoingRpc,
        on_result: Option<ResultCallback>,
        on_error: Option<ErrorCallback>,
        from: Option<String>,
    ) -> ZoneGridResult<()> {
        let OutgoingRpc {
            mut message,
            service_address,
        } = rpc;

        if message.id.is_none() {
            message.id = Some(Value::String(next_message_id()));
        }

        if on_result.is_some() || on_error.is_some() {
            if let Some(id) = &message.id {
                self.pending
                    .insert(id_key(id), PendingRequest { on_result, on_error });
            }
        }

        let to = service_address.or(from);
        let transport = {
            let slot = self.transport.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        match transport {
            Some(transport) => transport.write(message, to.as_deref()).await,
            None => {
                warn!("Could not execute RPC, no transport has been set");
                Ok(())
            }
        }
    }

    /// Convenience wrapper combining [`Self::create_rpc`] and
    /// [`Self::execute_rpc`].
    ///
    /// With `reply_object` set, the outgoing id is overwritten with that
    /// callback-object id so the response is delivered to it instead of a
    /// pending entry.
    pub async fn request(
        &self,
        service: &ServiceRef,
        method: &str,
        reply_object: Option<&str>,
        params: Value,
        on_result: Option<ResultCallback>,
        on_error: Option<ErrorCallback>,
    ) -> ZoneGridResult<()> {
        let mut rpc = self.create_rpc(service, method, params)?;
        if let Some(reply_object) = reply_object {
            rpc.message.id = Some(Value::String(reply_object.to_string()));
        }
        self.execute_rpc(rpc, on_result, on_error, None).await
    }

    /// Fire-and-forget variant of [`Self::request`].
    pub async fn notify(
        &self,
        service: &ServiceRef,
        method: &str,
        params: Value,
    ) -> ZoneGridResult<()> {
        self.request(service, method, None, params, None, None).await
    }

    /// Register an object that can receive many invocations over time. An id
    /// is assigned when the object has none, so later responses can still
    /// find it. Returns the id under which it was stored.
    pub fn register_callback_object(&self, mut callback: CallbackObject) -> String {
        let id = callback
            .id
            .take()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(next_message_id);
        callback.id = Some(id.clone());
        self.callbacks.insert(id.clone(), Arc::new(callback));
        id
    }

    /// Remove a callback object. Responses arriving afterwards are dropped.
    pub fn unregister_callback_object(&self, id: &str) {
        self.callbacks.remove(id);
    }

    /// Entry point for a JSON-RPC message delivered by the router.
    ///
    /// The policy hook, when installed, is consulted first; a denial sends a
    /// security-error response back along the reply path and the message is
    /// never dispatched.
    pub async fn handle_message(self: &Arc<Self>, rpc: RpcMessage, from: Option<String>) {
        let policy = {
            let slot = self.policy.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        if let Some(policy) = policy {
            if !policy.check(&rpc, from.as_deref()).await {
                let denial = RpcMessage::response_error(rpc.id.clone(), RpcError::security_denial());
                if let Err(error) = self
                    .execute_rpc(OutgoingRpc::from_message(denial), None, None, from)
                    .await
                {
                    warn!(error = %error, "Failed to send security-error response");
                }
                return;
            }
        }

        if rpc.is_request() {
            self.handle_request(rpc, from).await;
        } else {
            self.handle_response(rpc);
        }
    }

    async fn handle_request(self: &Arc<Self>, request: RpcMessage, from: Option<String>) {
        let Some(method_str) = request.method.as_deref() else {
            return;
        };
        let Some(path) = parse_method(method_str) else {
            warn!(method = %method_str, "Cannot handle request because of missing service");
            return;
        };

        debug!(
            service = %path.service,
            id = ?path.service_id,
            method = %path.method,
            "Got request to invoke"
        );

        // `@`-less names that are not meta-services address callback objects.
        let is_callback = path.service_id.is_none() && !is_meta_service(&path.service);
        let handler = if is_callback {
            match self.callbacks.get(&path.service) {
                Some(callback) => callback.handler(&path.method),
                None => {
                    debug!(service = %path.service, "No callback object found for id");
                    return;
                }
            }
        } else {
            match self
                .registry
                .service_with_type_and_id(&path.service, path.service_id.as_deref())
            {
                Some(service) => service.handler(&path.method),
                None => {
                    debug!(service = %path.service, "No service found with id/type");
                    return;
                }
            }
        };

        // A missing method is an expected race against unregistration, not an
        // error condition.
        let Some(handler) = handler else {
            debug!(service = %path.service, method = %path.method, "No handler for method");
            return;
        };

        let responder = Responder::new(Arc::clone(self), request.id.clone(), from.clone());
        let caller = CallerRef {
            rpc_id: request.id.clone(),
            from,
        };
        handler
            .call(request.params.clone().unwrap_or(Value::Null), responder, caller)
            .await;
    }

    fn handle_response(&self, response: RpcMessage) {
        // Without an id there is no callback to invoke.
        let Some(id) = response.id.as_ref() else {
            return;
        };
        let key = id_key(id);
        debug!(id = %key, "Received response");

        if let Some((_, pending)) = self.pending.remove(&key) {
            // Removal above makes resolution exactly-once: a duplicate
            // response finds no entry.
            if let Some(result) = response.result {
                if let Some(on_result) = pending.on_result {
                    on_result(result);
                }
            } else if let Some(error) = response.error {
                if let Some(on_error) = pending.on_error {
                    on_error(error.data);
                }
            }
        } else if let Some(callback) = self.callbacks.get(&key) {
            if let Some(error) = &response.error {
                if error.is_security() {
                    callback.notify_security_error(error);
                }
            }
            // Callback objects may receive more invocations; a response never
            // removes them.
            debug!(id = %key, "Dropping response addressed to a callback object");
        }
    }
}

/// The parsed form of a request's dotted method string:
/// `service[@id][.path].finalMethod` or `callbackId[.path].finalMethod`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MethodPath {
    /// Service type, meta-service name, or callback-object id.
    service: String,
    /// Fingerprint id when the locator was written `type@id`.
    service_id: Option<String>,
    /// Dispatch-table key: intermediate path segments plus final method name.
    method: String,
}

fn parse_method(method: &str) -> Option<MethodPath> {
    let (path, final_method) = method.rsplit_once('.')?;
    if path.is_empty() || final_method.is_empty() {
        return None;
    }

    // Service types are URIs and may contain dots, so the `@` separator
    // anchors the split; without one, the first dot ends the locator.
    match path.split_once('@') {
        Some((api, rest)) => {
            if api.is_empty() {
                return None;
            }
            let (service_id, nested) = match rest.split_once('.') {
                Some((id, nested)) => (id.to_string(), Some(nested)),
                None => (rest.to_string(), None),
            };
            let mut key_parts: Vec<&str> = nested
                .map(|n| n.split('.').filter(|p| !p.is_empty() && !p.contains('@')).collect())
                .unwrap_or_default();
            key_parts.push(final_method);
            Some(MethodPath {
                service: api.to_string(),
                service_id: Some(service_id),
                method: key_parts.join("."),
            })
        }
        None => {
            let (service, nested) = match path.split_once('.') {
                Some((service, nested)) => (service, Some(nested)),
                None => (path, None),
            };
            let mut key_parts: Vec<&str> = nested
                .map(|n| n.split('.').filter(|p| !p.is_empty()).collect())
                .unwrap_or_default();
            key_parts.push(final_method);
            Some(MethodPath {
                service: service.to_string(),
                service_id: None,
                method: key_parts.join("."),
            })
        }
    }
}
