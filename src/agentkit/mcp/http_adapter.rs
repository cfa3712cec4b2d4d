//! HTTP adapter for the MCP server.
//!
//! Exposes an [`McpServer`] over the Streamable HTTP transport: clients
//! POST JSON-RPC messages to `/mcp` and receive a single JSON response per
//! request.  Notifications are acknowledged with `202 Accepted` and an
//! empty body.
//!
//! # Design
//!
//! ```text
//! McpServer (dispatcher)
//!        ↓
//! create_router / HttpMcpAdapter
//!        ↓
//! axum Router (POST /mcp, GET /health)
//! ```
//!
//! The adapter holds no per-connection state; the shared [`McpServer`] is
//! thread-safe and handles concurrent requests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use rpc::jsonrpc::{ErrorObject, JsonRpcMessage, Response};
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;

use crate::agentkit::error::AgentError;
use crate::agentkit::mcp::server::McpServer;

/// Configuration for an HTTP MCP endpoint.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Socket address to bind to (e.g., "127.0.0.1:8080").
    pub addr: SocketAddr,
    /// Optional bearer token required on every request.
    pub bearer_token: Option<String>,
}

impl HttpServerConfig {
    /// Config binding `addr` with no authentication.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            bearer_token: None,
        }
    }

    /// Require a bearer token on every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// A running HTTP server instance.
pub struct HttpServerInstance {
    /// Socket address the server is listening on.
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl HttpServerInstance {
    /// Get the server's socket address.
    pub fn get_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

struct AdapterState {
    server: McpServer,
    bearer_token: Option<String>,
}

fn token_matches(expected: &str, headers: &HeaderMap) -> bool {
    let supplied = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

async fn handle_mcp(
    State(state): State<Arc<AdapterState>>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> axum::response::Response {
    if let Some(expected) = &state.bearer_token {
        if !token_matches(expected, &headers) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "invalid bearer token"})),
            )
                .into_response();
        }
    }

    let message = match JsonRpcMessage::from_value(payload) {
        Ok(message) => message,
        Err(err) => {
            let response = Response::error(
                None,
                ErrorObject::new(rpc::jsonrpc::error_codes::INVALID_REQUEST, err.to_string()),
            );
            return (StatusCode::OK, Json(serde_json::to_value(&response).expect("response envelopes always serialize"))).into_response();
        }
    };

    match state.server.handle_message(message).await {
        Some(response) => {
            (StatusCode::OK, Json(serde_json::to_value(&response).expect("response envelopes always serialize"))).into_response()
        }
        // Notification: nothing to send back.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// `GET /mcp`: a standing SSE stream carrying the server's notifications
/// (`tools/list_changed`, `resources/updated`, ...), so HTTP clients see
/// the same signals a stdio client would.
async fn handle_mcp_events(
    State(state): State<Arc<AdapterState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Some(expected) = &state.bearer_token {
        if !token_matches(expected, &headers) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "invalid bearer token"})),
            )
                .into_response();
        }
    }

    let receiver = state.server.subscribe_notifications();
    let stream = async_stream::stream! {
        let mut receiver = receiver;
        loop {
            match receiver.recv().await {
                Ok(frame) => {
                    let data = String::from_utf8_lossy(&frame).into_owned();
                    yield Ok::<_, std::convert::Infallible>(
                        axum::response::sse::Event::default().data(data),
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("notification stream lagged by {} frames", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    axum::response::sse::Sse::new(stream).into_response()
}

async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Build the axum router for an MCP server.
pub fn create_router(server: McpServer, bearer_token: Option<String>) -> Router {
    let state = Arc::new(AdapterState {
        server,
        bearer_token,
    });
    Router::new()
        .route("/mcp", post(handle_mcp).get(handle_mcp_events))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Bind and serve an [`McpServer`] over HTTP.
pub async fn start_http_server(
    server: McpServer,
    config: HttpServerConfig,
) -> Result<HttpServerInstance, AgentError> {
    let router = create_router(server, config.bearer_token.clone());
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| AgentError::Config(format!("bind {}: {}", config.addr, e)))?;
    let addr = listener
        .local_addr()
        .map_err(|e| AgentError::Config(e.to_string()))?;

    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            log::error!("MCP HTTP server stopped: {}", err);
        }
    });
    log::info!("MCP HTTP server listening on http://{}", addr);

    Ok(HttpServerInstance { addr, handle })
}
