//! Error taxonomy shared across the toolkit.
//!
//! Every fallible surface returns [`AgentError`].  The variants mirror the
//! failure domains of the stack: configuration, transport, protocol
//! envelopes, authentication, tool dispatch, timeouts, and cancellation.
//! Transport errors come straight from the `rpc` crate; the remaining
//! domains are defined here.
//!
//! Propagation rules: transport errors are reported to the awaiting
//! request and never tear down the owning client unless the transport
//! itself is unrecoverable; auth errors raised during a tool call surface
//! to the orchestrator as a failed tool result rather than a crash; server
//! handler errors become JSON-RPC error responses.

use std::time::Duration;

use rpc::jsonrpc::CodecError;
use rpc::transport::TransportError;

/// Tool dispatch failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Requested tool is not registered with any provider.
    #[error("Tool not found: {0}")]
    NotFound(String),
    /// Tool execution completed with an application level failure.
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
    /// The provided JSON parameters failed validation or deserialization.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    /// The tool-call loop exceeded its round limit.
    #[error("tool loop limit of {0} rounds exceeded")]
    LoopLimit(usize),
}

/// Authentication and authorization failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Authorization-server metadata could not be discovered.
    #[error("metadata discovery failed: {0}")]
    DiscoveryFailed(String),
    /// Dynamic client registration (RFC 7591) was rejected.
    #[error("client registration failed (HTTP {status}): {body}")]
    RegistrationFailed { status: u16, body: String },
    /// The authorization URL was issued; a redirect code is still awaited.
    #[error("authorization pending; complete the flow at the issued URL")]
    AuthorizationPending,
    /// The requested scope was rejected by the authorization server.
    #[error("invalid scope: {0}")]
    InvalidScope(String),
    /// The authorization-code or refresh-token exchange failed.
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    /// Credentials are expired and could not be refreshed.
    #[error("credentials expired")]
    Expired,
    /// A refresh attempt failed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    /// The provider is misconfigured (missing token, endpoint, ...).
    #[error("auth configuration error: {0}")]
    Config(String),
}

/// Timeouts, by the phase that expired.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    #[error("connection timed out after {0:?}")]
    Connection(Duration),
    #[error("request timed out after {0:?}")]
    Request(Duration),
    #[error("stream idle for {0:?}")]
    IdleStream(Duration),
}

/// Top-level error type for every toolkit operation.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Malformed configuration, missing fields, unknown auth type.
    #[error("configuration error: {0}")]
    Config(String),
    /// Broken pipes, closed streams, framing violations, HTTP failures.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// JSON-RPC envelope violations, unexpected ids, state-machine
    /// violations such as a tool call before initialize.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// The operation was cancelled by its caller.
    #[error("cancelled")]
    Cancelled,
}

impl From<CodecError> for AgentError {
    fn from(err: CodecError) -> Self {
        AgentError::Protocol(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Protocol(format!("JSON decode failure: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_wrap_transparently() {
        let err: AgentError = TransportError::PipeError("EPIPE".to_string()).into();
        assert!(err.to_string().contains("broken pipe"));
        assert!(matches!(
            err,
            AgentError::Transport(TransportError::PipeError(_))
        ));
    }

    #[test]
    fn test_codec_errors_become_protocol_errors() {
        let codec = rpc::jsonrpc::JsonRpcMessage::from_slice(b"{}").unwrap_err();
        let err: AgentError = codec.into();
        assert!(matches!(err, AgentError::Protocol(_)));
    }

    #[test]
    fn test_loop_limit_message_names_round_count() {
        let err = AgentError::from(ToolError::LoopLimit(8));
        assert!(err.to_string().contains("8"));
    }

    #[test]
    fn test_registration_failure_carries_status_and_body() {
        let err = AuthError::RegistrationFailed {
            status: 400,
            body: "invalid_redirect_uri".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("400"));
        assert!(text.contains("invalid_redirect_uri"));
    }
}
