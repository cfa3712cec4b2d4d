//! JSON-RPC 2.0 envelope codec.
//!
//! Encodes and decodes the three JSON-RPC message shapes (requests,
//! notifications, responses) and enforces the envelope rules the rest of
//! the stack relies on: requests carry an id, notifications do not, and a
//! response carries exactly one of `result` / `error`.
//!
//! # Example
//!
//! ```rust
//! use rpc::jsonrpc::{IdAllocator, JsonRpcMessage, Request};
//!
//! let ids = IdAllocator::new();
//! let request = Request::new(ids.next(), "tools/list", None);
//!
//! let decoded = JsonRpcMessage::from_slice(&request.to_bytes()).unwrap();
//! match decoded {
//!     JsonRpcMessage::Request(r) => assert_eq!(r.method, "tools/list"),
//!     _ => panic!("expected a request"),
//! }
//! ```

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string stamped on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known JSON-RPC 2.0 error codes plus the application-reserved range.
pub mod error_codes {
    /// Invalid JSON was received by the peer.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Start of the range reserved for application-defined errors.
    pub const APPLICATION_ERROR_MIN: i64 = -32099;
    /// End of the range reserved for application-defined errors.
    pub const APPLICATION_ERROR_MAX: i64 = -32000;
}

/// Errors produced while decoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload was not valid JSON at all.
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// The payload was JSON but violated the JSON-RPC 2.0 envelope rules.
    #[error("malformed JSON-RPC envelope: {0}")]
    MalformedEnvelope(String),
}

/// A request id: JSON-RPC allows integers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// Monotonic per-client id allocator.
///
/// Every client owns one allocator so that request ids never collide within
/// a single connection.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
}

impl IdAllocator {
    /// Create an allocator whose first issued id is `1`.
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Allocate the next id.
    pub fn next(&self) -> RequestId {
        RequestId::Number(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON-RPC request: carries an id and expects exactly one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Build a request envelope for `method` with optional `params`.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to a compact JSON byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("request envelopes always serialize")
    }
}

/// A JSON-RPC notification: no id, no response expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Build a notification envelope for `method` with optional `params`.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Serialize to a compact JSON byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("notification envelopes always serialize")
    }
}

/// Error member of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build an error object with no attached data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Shorthand for a `-32601` method-not-found error.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    /// Shorthand for a `-32602` invalid-params error.
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(
            error_codes::INVALID_PARAMS,
            format!("Invalid params: {}", detail.into()),
        )
    }

    /// Shorthand for a `-32603` internal error.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            error_codes::INTERNAL_ERROR,
            format!("Internal error: {}", detail.into()),
        )
    }
}

/// A JSON-RPC response.
///
/// The id is `None` only for error responses to unparseable requests, where
/// JSON-RPC mandates `"id": null`.  Exactly one of `result` / `error` is
/// present; [`JsonRpcMessage::from_value`] rejects envelopes that violate
/// this.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Build a success response carrying `result`.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Serialize to a compact JSON byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("response envelopes always serialize")
    }

    /// Consume the response, yielding the result or the error object.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match (self.result, self.error) {
            (Some(v), None) => Ok(v),
            (None, Some(e)) => Err(e),
            // from_value rejects other shapes; unreachable via decode.
            (Some(v), Some(_)) => Ok(v),
            (None, None) => Err(ErrorObject::internal("empty response envelope")),
        }
    }
}

/// The three JSON-RPC message shapes, discriminated at decode time.
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl JsonRpcMessage {
    /// Decode a single message from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Decode a single message from an already-parsed JSON value.
    ///
    /// Discrimination rules:
    /// - `method` present, `id` present → request
    /// - `method` present, `id` absent → notification
    /// - `method` absent → response; must carry exactly one of
    ///   `result` / `error` or decoding fails with
    ///   [`CodecError::MalformedEnvelope`].
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CodecError::MalformedEnvelope("not a JSON object".to_string()))?;

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(CodecError::MalformedEnvelope(format!(
                    "unsupported jsonrpc version {:?}",
                    other
                )))
            }
            None => {
                return Err(CodecError::MalformedEnvelope(
                    "missing jsonrpc version".to_string(),
                ))
            }
        }

        if obj.contains_key("method") {
            let method = obj
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::MalformedEnvelope("method must be a string".to_string()))?
                .to_string();
            let params = obj.get("params").cloned();

            return match obj.get("id") {
                Some(id_value) if !id_value.is_null() => {
                    let id = decode_id(id_value)?;
                    Ok(JsonRpcMessage::Request(Request {
                        jsonrpc: JSONRPC_VERSION.to_string(),
                        id,
                        method,
                        params,
                    }))
                }
                _ => Ok(JsonRpcMessage::Notification(Notification {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    method,
                    params,
                })),
            };
        }

        // Response path: "result" and "error" presence is checked on the raw
        // object so a legitimate `"result": null` is not mistaken for absence.
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");
        match (has_result, has_error) {
            (true, true) => {
                return Err(CodecError::MalformedEnvelope(
                    "response carries both result and error".to_string(),
                ))
            }
            (false, false) => {
                return Err(CodecError::MalformedEnvelope(
                    "response carries neither result nor error".to_string(),
                ))
            }
            _ => {}
        }

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(id_value) => Some(decode_id(id_value)?),
        };
        let result = if has_result {
            obj.get("result").cloned()
        } else {
            None
        };
        let error = match obj.get("error") {
            Some(e) => Some(
                serde_json::from_value::<ErrorObject>(e.clone())
                    .map_err(|e| CodecError::MalformedEnvelope(format!("bad error object: {}", e)))?,
            ),
            None => None,
        };

        Ok(JsonRpcMessage::Response(Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
            error,
        }))
    }

    /// Serialize to a compact JSON byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            JsonRpcMessage::Request(r) => r.to_bytes(),
            JsonRpcMessage::Notification(n) => n.to_bytes(),
            JsonRpcMessage::Response(r) => r.to_bytes(),
        }
    }

    /// The method name for requests and notifications, `None` for responses.
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            JsonRpcMessage::Response(_) => None,
        }
    }
}

fn decode_id(value: &Value) -> Result<RequestId, CodecError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| CodecError::MalformedEnvelope("non-integer numeric id".to_string())),
        Value::String(s) => Ok(RequestId::String(s.clone())),
        other => Err(CodecError::MalformedEnvelope(format!(
            "id must be an integer or string, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let request = Request::new(RequestId::Number(7), "tools/call", Some(json!({"name": "echo"})));
        let decoded = JsonRpcMessage::from_slice(&request.to_bytes()).unwrap();
        match decoded {
            JsonRpcMessage::Request(r) => {
                assert_eq!(r.id, RequestId::Number(7));
                assert_eq!(r.method, "tools/call");
                assert_eq!(r.params.unwrap()["name"], "echo");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_notification_has_no_id() {
        let notification = Notification::new("notifications/initialized", None);
        let bytes = notification.to_bytes();
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(raw.get("id").is_none());

        match JsonRpcMessage::from_slice(&bytes).unwrap() {
            JsonRpcMessage::Notification(n) => {
                assert_eq!(n.method, "notifications/initialized")
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_response_with_null_result_is_valid() {
        let bytes = br#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        match JsonRpcMessage::from_slice(bytes).unwrap() {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.id, Some(RequestId::Number(1)));
                assert_eq!(r.result, Some(Value::Null));
                assert!(r.error.is_none());
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_response_with_both_members_is_malformed() {
        let bytes = br#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":-32603,"message":"x"}}"#;
        let err = JsonRpcMessage::from_slice(bytes).unwrap_err();
        assert!(matches!(err, CodecError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_response_with_neither_member_is_malformed() {
        let bytes = br#"{"jsonrpc":"2.0","id":1}"#;
        let err = JsonRpcMessage::from_slice(bytes).unwrap_err();
        assert!(matches!(err, CodecError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_missing_version_is_malformed() {
        let bytes = br#"{"id":1,"method":"ping"}"#;
        let err = JsonRpcMessage::from_slice(bytes).unwrap_err();
        assert!(matches!(err, CodecError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_string_ids_survive() {
        let request = Request::new(RequestId::from("abc-123"), "ping", None);
        match JsonRpcMessage::from_slice(&request.to_bytes()).unwrap() {
            JsonRpcMessage::Request(r) => assert_eq!(r.id, RequestId::String("abc-123".to_string())),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_error_response_with_null_id() {
        let response = Response::error(
            None,
            ErrorObject::new(error_codes::PARSE_ERROR, "Parse error"),
        );
        let raw: Value = serde_json::from_slice(&response.to_bytes()).unwrap();
        assert!(raw["id"].is_null());

        match JsonRpcMessage::from_slice(&response.to_bytes()).unwrap() {
            JsonRpcMessage::Response(r) => {
                assert!(r.id.is_none());
                assert_eq!(r.error.unwrap().code, error_codes::PARSE_ERROR);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_id_allocator_is_monotonic() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next(), RequestId::Number(1));
        assert_eq!(ids.next(), RequestId::Number(2));
        assert_eq!(ids.next(), RequestId::Number(3));
    }

    #[test]
    fn test_into_result_splits_success_and_error() {
        let ok = Response::success(RequestId::Number(1), json!({"tools": []}));
        assert!(ok.into_result().is_ok());

        let err = Response::error(
            Some(RequestId::Number(2)),
            ErrorObject::method_not_found("nope"),
        );
        let e = err.into_result().unwrap_err();
        assert_eq!(e.code, error_codes::METHOD_NOT_FOUND);
        assert!(e.message.contains("nope"));
    }

    #[test]
    fn test_boolean_params_stay_boolean() {
        let request = Request::new(
            RequestId::Number(1),
            "tools/call",
            Some(json!({"flag": true, "count": 1})),
        );
        match JsonRpcMessage::from_slice(&request.to_bytes()).unwrap() {
            JsonRpcMessage::Request(r) => {
                let params = r.params.unwrap();
                assert!(params["flag"].is_boolean());
                assert!(params["count"].is_number());
                assert!(!params["count"].is_boolean());
            }
            other => panic!("expected request, got {:?}", other),
        }
    }
}
