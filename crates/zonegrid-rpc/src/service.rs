//! Service and callback-object model.
//!
//! Everything reachable by remote invocation carries an explicit dispatch
//! table (`method name -> handler`) built before registration. Nested targets
//! are registered under dotted keys (`"watch.attach"`), which keeps the set of
//! invocable methods enumerable instead of being discovered by walking object
//! attributes at runtime.

use crate::correlator::{OutgoingRpc, RpcCorrelator};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;
use zonegrid_types::rpc::{id_key, RpcError, RpcMessage};
use zonegrid_types::ZoneGridResult;

/// A method exposed for remote invocation.
///
/// Handlers receive the request params, a [`Responder`] for the terminal
/// reply, and a [`CallerRef`] identifying the caller's callback object for
/// streaming/event-style follow-ups.
#[async_trait]
pub trait ServiceMethod: Send + Sync {
    async fn call(&self, params: Value, responder: Responder, caller: CallerRef);
}

struct FnMethod<F>(F);

#[async_trait]
impl<F, Fut> ServiceMethod for FnMethod<F>
where
    F: Fn(Value, Responder, CallerRef) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn call(&self, params: Value, responder: Responder, caller: CallerRef) {
        (self.0)(params, responder, caller).await;
    }
}

/// Wrap an async closure as a [`ServiceMethod`].
pub fn method_fn<F, Fut>(f: F) -> Arc<dyn ServiceMethod>
where
    F: Fn(Value, Responder, CallerRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnMethod(f))
}

/// Sends the terminal result or error of one invocation back to the caller.
///
/// Consuming `self` makes the at-most-one-reply rule a compile-time property.
/// For fire-and-forget notifications (requests without an id) both methods
/// are no-ops.
pub struct Responder {
    correlator: Arc<RpcCorrelator>,
    id: Option<Value>,
    reply_to: Option<String>,
}

impl Responder {
    pub(crate) fn new(
        correlator: Arc<RpcCorrelator>,
        id: Option<Value>,
        reply_to: Option<String>,
    ) -> Self {
        Self {
            correlator,
            id,
            reply_to,
        }
    }

    /// True when the request carried an id and therefore expects a reply.
    pub fn expects_reply(&self) -> bool {
        self.id.is_some()
    }

    /// Send a success response.
    pub async fn result(self, value: Value) {
        let Some(id) = self.id.clone() else { return };
        let rpc = RpcMessage::response_result(Some(id), Some(value));
        self.send(rpc).await;
    }

    /// Send an error response; `value` lands in the error's `data` field.
    pub async fn error(self, value: Value) {
        let Some(id) = self.id.clone() else { return };
        let rpc = RpcMessage::response_error(Some(id), value);
        self.send(rpc).await;
    }

    async fn send(self, rpc: RpcMessage) {
        if let Err(error) = self
            .correlator
            .execute_rpc(OutgoingRpc::from_message(rpc), None, None, self.reply_to)
            .await
        {
            warn!(error = %error, "Failed to send invocation response");
        }
    }
}

/// Identifies the caller of an invocation: the request id and sender address.
///
/// Passing this back through [`CallerRef::service_ref`] addresses the
/// caller's registered callback object, which is how one request fans out
/// into many asynchronous follow-up invocations.
#[derive(Debug, Clone)]
pub struct CallerRef {
    pub rpc_id: Option<Value>,
    pub from: Option<String>,
}

impl CallerRef {
    /// A [`ServiceRef`] targeting the caller's callback object, if the
    /// request carried an id.
    pub fn service_ref(&self) -> Option<ServiceRef> {
        let rpc_id = self.rpc_id.as_ref().map(id_key)?;
        Some(ServiceRef::Callback {
            rpc_id,
            from: self.from.clone(),
        })
    }
}

/// What an outgoing RPC is addressed at.
#[derive(Debug, Clone)]
pub enum ServiceRef {
    /// A discovered service instance; produces `<api>@<id>.<method>`.
    Service {
        api: String,
        id: String,
        /// Explicit owner address; routes the call directly to that node
        /// instead of through default session lookup.
        address: Option<String>,
    },
    /// A remote callback object; produces `<rpcId>.<method>`.
    Callback {
        rpc_id: String,
        from: Option<String>,
    },
    /// A bare service name (meta-services such as discovery).
    Named(String),
}

/// An event broadcast to registered service objects.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub name: String,
    pub data: Value,
}

/// A listener attached to a service object for a named event.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ServiceEvent) -> ZoneGridResult<()>;
}

/// A service object under construction, before registration freezes it.
pub struct ServiceObject {
    pub(crate) api: String,
    pub(crate) display_name: String,
    pub(crate) description: String,
    pub(crate) methods: HashMap<String, Arc<dyn ServiceMethod>>,
    pub(crate) listeners: HashMap<String, Vec<Arc<dyn EventListener>>>,
}

impl ServiceObject {
    pub fn new(
        api: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            api: api.into(),
            display_name: display_name.into(),
            description: description.into(),
            methods: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    /// Expose a method. Dotted names register nested targets.
    pub fn method(mut self, name: impl Into<String>, handler: Arc<dyn ServiceMethod>) -> Self {
        self.methods.insert(name.into(), handler);
        self
    }

    /// Attach a listener for a named event.
    pub fn listener(mut self, event: impl Into<String>, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.entry(event.into()).or_default().push(listener);
        self
    }
}

/// A long-lived RPC target that can receive many invocations (streaming /
/// event pattern), as opposed to a single-shot pending request. Lives in the
/// correlator's callback table until explicitly unregistered.
pub struct CallbackObject {
    pub(crate) id: Option<String>,
    pub(crate) methods: HashMap<String, Arc<dyn ServiceMethod>>,
    pub(crate) on_security_error: Option<Box<dyn Fn(&RpcError) + Send + Sync>>,
}

impl CallbackObject {
    /// A callback object with no id yet; one is assigned at registration.
    pub fn new() -> Self {
        Self {
            id: None,
            methods: HashMap::new(),
            on_security_error: None,
        }
    }

    /// A callback object keyed to an existing RPC id, so that responses to
    /// that request reach it.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new()
        }
    }

    pub fn method(mut self, name: impl Into<String>, handler: Arc<dyn ServiceMethod>) -> Self {
        self.methods.insert(name.into(), handler);
        self
    }

    /// Hook invoked when a response carries a policy-denial error.
    pub fn on_security_error(mut self, hook: impl Fn(&RpcError) + Send + Sync + 'static) -> Self {
        self.on_security_error = Some(Box::new(hook));
        self
    }

    pub(crate) fn handler(&self, name: &str) -> Option<Arc<dyn ServiceMethod>> {
        self.methods.get(name).cloned()
    }

    pub(crate) fn notify_security_error(&self, error: &RpcError) {
        if let Some(hook) = &self.on_security_error {
            hook(error);
        }
    }
}

impl Default for CallbackObject {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_ref_to_service_ref() {
        let caller = CallerRef {
            rpc_id: Some(Value::String("req-9".into())),
            from: Some("zone/phone".into()),
        };
        match caller.service_ref() {
            Some(ServiceRef::Callback { rpc_id, from }) => {
                assert_eq!(rpc_id, "req-9");
                assert_eq!(from.as_deref(), Some("zone/phone"));
            }
            other => panic!("Expected callback ref, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn test_caller_ref_without_id_has_no_service_ref() {
        let caller = CallerRef {
            rpc_id: None,
            from: Some("zone/phone".into()),
        };
        assert!(caller.service_ref().is_none());
    }

    #[test]
    fn test_numeric_rpc_id_coerced() {
        let caller = CallerRef {
            rpc_id: Some(Value::from(17)),
            from: None,
        };
        match caller.service_ref() {
            Some(ServiceRef::Callback { rpc_id, .. }) => assert_eq!(rpc_id, "17"),
            _ => panic!("Expected callback ref"),
        }
    }
}
