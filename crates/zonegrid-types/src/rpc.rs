//! JSON-RPC 2.0 payload types.
//!
//! Field names are a compatibility surface: peers that have not been migrated
//! still parse these messages, so `jsonrpc`, `id`, `method`, `params`,
//! `result` and `error` must appear on the wire exactly as written here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Protocol version stamped on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used when a method invocation fails inside the target service.
pub const INVOCATION_ERROR_CODE: i64 = -31000;

/// Error message accompanying [`INVOCATION_ERROR_CODE`].
pub const INVOCATION_ERROR_MESSAGE: &str = "Method Invocation returned with error";

/// DOM-style error code carried in the `data` of a policy denial.
pub const SECURITY_ERROR_CODE: i64 = 18;

/// Name of the error carried in the `data` of a policy denial.
pub const SECURITY_ERROR_NAME: &str = "SecurityError";

/// A JSON-RPC 2.0 message: request, notification, or response.
///
/// A single type covers all three shapes so that a router can re-serialize a
/// forwarded payload byte-compatibly without knowing which shape it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    pub jsonrpc: String,
    /// Request/response correlation id. Strings and numbers both appear on
    /// the wire; correlation tables coerce numbers to their decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcMessage {
    /// Build a request (or, with `id` absent, a notification).
    pub fn request(id: Option<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a success response. An absent result is coerced to `{}` so the
    /// caller's success callback always receives a value.
    pub fn response_result(id: Option<Value>, result: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: Some(result.unwrap_or_else(|| Value::Object(Default::default()))),
            error: None,
        }
    }

    /// Build an error response wrapping `data` in the standard
    /// method-invocation error envelope.
    pub fn response_error(id: Option<Value>, data: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: None,
            error: Some(RpcError::invocation(data)),
        }
    }

    /// True when the message carries a method to invoke.
    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }

    /// True when the message is a terminal response (success or error).
    pub fn is_response(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Wrap an application-level failure in the invocation-error envelope.
    pub fn invocation(data: Value) -> Self {
        Self {
            code: INVOCATION_ERROR_CODE,
            message: INVOCATION_ERROR_MESSAGE.to_string(),
            data: Some(data),
        }
    }

    /// The `data` payload of a policy-check denial.
    pub fn security_denial() -> Value {
        serde_json::json!({
            "name": SECURITY_ERROR_NAME,
            "code": SECURITY_ERROR_CODE,
            "message": "Access has been denied.",
        })
    }

    /// True when the error's `data` names a [`SECURITY_ERROR_NAME`].
    pub fn is_security(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
            .map(|name| name == SECURITY_ERROR_NAME)
            .unwrap_or(false)
    }
}

/// A fresh random message id (UUID v4, as string).
pub fn next_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Coerce a wire id into a correlation-table key. Numbers become their
/// decimal string, so string-keyed and number-keyed peers correlate the same
/// way.
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let rpc = RpcMessage::request(
            Some(Value::String("abc".into())),
            "Foo@1234.bar",
            serde_json::json!([1, 2]),
        );
        let json = serde_json::to_value(&rpc).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "Foo@1234.bar");
        assert_eq!(json["params"], serde_json::json!([1, 2]));
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_response_result_defaults_to_empty_object() {
        let rpc = RpcMessage::response_result(Some(Value::from(7)), None);
        assert_eq!(rpc.result, Some(serde_json::json!({})));
        assert!(rpc.is_response());
        assert!(!rpc.is_request());
    }

    #[test]
    fn test_error_envelope() {
        let rpc = RpcMessage::response_error(
            Some(Value::String("id-1".into())),
            serde_json::json!("boom"),
        );
        let err = rpc.error.unwrap();
        assert_eq!(err.code, INVOCATION_ERROR_CODE);
        assert_eq!(err.message, INVOCATION_ERROR_MESSAGE);
        assert_eq!(err.data, Some(serde_json::json!("boom")));
    }

    #[test]
    fn test_security_denial_detected() {
        let err = RpcError::invocation(RpcError::security_denial());
        assert!(err.is_security());

        let other = RpcError::invocation(serde_json::json!({"name": "TypeError"}));
        assert!(!other.is_security());
    }

    #[test]
    fn test_id_key_coercion() {
        assert_eq!(id_key(&Value::String("x".into())), "x");
        assert_eq!(id_key(&Value::from(42)), "42");
    }

    #[test]
    fn test_parse_foreign_response() {
        let raw = r#"{"jsonrpc":"2.0","id":9,"error":{"code":-31000,"message":"Method Invocation returned with error","data":{"name":"SecurityError","code":18}}}"#;
        let rpc: RpcMessage = serde_json::from_str(raw).unwrap();
        assert!(rpc.is_response());
        assert!(rpc.error.unwrap().is_security());
    }
}
