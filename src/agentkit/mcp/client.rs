//! MCP client.
//!
//! Speaks MCP over any [`Transport`]: the initialize handshake, tool
//! listing and invocation, the resource lifecycle, and server
//! notifications.  One background router task demultiplexes inbound
//! frames: responses complete their pending request by id, notifications
//! fire registered callbacks, and server-initiated requests (unsupported)
//! are answered with method-not-found.
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected → Connecting → Initialized → Operational
//!                    ↓                            ↓
//!                  Failed                    ShuttingDown → Disconnected
//! ```
//!
//! A server that never answers `initialize` leaves the client in `Failed`;
//! the caller decides whether to build a fresh client and retry.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentkit::mcp::McpClient;
//! use rpc::stdio::StdioTransport;
//!
//! # async fn demo() -> Result<(), agentkit::AgentError> {
//! let transport = StdioTransport::spawn("my-mcp-server", &[], &Default::default())?;
//! let client = McpClient::new("agentkit", "0.1.0");
//! client.connect(Box::new(transport)).await?;
//!
//! let tools = client.tools().await?;
//! println!("{} tools available", tools.len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rpc::jsonrpc::{ErrorObject, IdAllocator, JsonRpcMessage, Notification, Request, RequestId, Response};
use rpc::transport::{InboundStream, Transport, TransportError};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::agentkit::error::{AgentError, TimeoutError, ToolError};
use crate::agentkit::mcp::types::{
    methods, CallToolParams, CallToolResult, ClientCapabilities, Content, Implementation,
    InitializeParams, InitializeResult, ListResourcesResult, ListToolsResult, McpTool,
    ReadResourceResult, ResourceContents, ResourceDescriptor, ResourceUriParams,
    ServerCapabilities, PROTOCOL_VERSION,
};
use crate::agentkit::tool_protocol::ToolDefinition;

/// Default time budget for the initialize handshake.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time budget for an individual RPC.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Initialized,
    Operational,
    ShuttingDown,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Initialized => "initialized",
            ConnectionState::Operational => "operational",
            ConnectionState::ShuttingDown => "shutting-down",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

type ToolsChangedCallback = Box<dyn Fn() + Send + Sync>;
type ResourceUpdatedCallback = Box<dyn Fn(&str) + Send + Sync>;

struct ClientShared {
    client_info: Implementation,
    request_timeout: Duration,
    state: RwLock<ConnectionState>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    ids: IdAllocator,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Result<Response, AgentError>>>>,
    server_capabilities: RwLock<Option<ServerCapabilities>>,
    server_info: RwLock<Option<Implementation>>,
    tools_cache: RwLock<Option<Vec<McpTool>>>,
    tools_changed_callbacks: RwLock<Vec<ToolsChangedCallback>>,
    resources_changed_callbacks: RwLock<Vec<ToolsChangedCallback>>,
    resource_updated_callbacks: RwLock<Vec<ResourceUpdatedCallback>>,
}

impl ClientShared {
    async fn send_raw(&self, bytes: &[u8]) -> Result<(), AgentError> {
        let guard = self.transport.lock().await;
        let transport = guard.as_ref().ok_or(TransportError::Closed)?;
        transport.send(bytes).await.map_err(AgentError::from)
    }

    /// Complete every in-flight request with an error derived per entry.
    async fn fail_pending(&self, make_error: impl Fn() -> AgentError) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(make_error()));
        }
    }

    async fn handle_notification(&self, notification: Notification) {
        match notification.method.as_str() {
            methods::NOTIFICATION_TOOLS_LIST_CHANGED => {
                *self.tools_cache.write().await = None;
                for callback in self.tools_changed_callbacks.read().await.iter() {
                    callback();
                }
            }
            methods::NOTIFICATION_RESOURCES_LIST_CHANGED => {
                for callback in self.resources_changed_callbacks.read().await.iter() {
                    callback();
                }
            }
            methods::NOTIFICATION_RESOURCES_UPDATED => {
                let uri = notification
                    .params
                    .as_ref()
                    .and_then(|p| p["uri"].as_str())
                    .unwrap_or_default()
                    .to_string();
                for callback in self.resource_updated_callbacks.read().await.iter() {
                    callback(&uri);
                }
            }
            other => {
                log::debug!("ignoring unhandled notification {}", other);
            }
        }
    }
}

/// Client half of the MCP runtime.
pub struct McpClient {
    shared: Arc<ClientShared>,
    connection_timeout: Duration,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Create a disconnected client advertising `name`/`version`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_timeouts(name, version, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with explicit connection and request timeouts.
    pub fn with_timeouts(
        name: impl Into<String>,
        version: impl Into<String>,
        connection_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                client_info: Implementation {
                    name: name.into(),
                    version: version.into(),
                },
                request_timeout,
                state: RwLock::new(ConnectionState::Disconnected),
                transport: Mutex::new(None),
                ids: IdAllocator::new(),
                pending: Mutex::new(HashMap::new()),
                server_capabilities: RwLock::new(None),
                server_info: RwLock::new(None),
                tools_cache: RwLock::new(None),
                tools_changed_callbacks: RwLock::new(Vec::new()),
                resources_changed_callbacks: RwLock::new(Vec::new()),
                resource_updated_callbacks: RwLock::new(Vec::new()),
            }),
            connection_timeout,
            router: Mutex::new(None),
        }
    }

    /// The client's current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    /// Capabilities reported by the server, available after connect.
    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.shared.server_capabilities.read().await.clone()
    }

    /// Implementation info reported by the server, available after connect.
    pub async fn server_info(&self) -> Option<Implementation> {
        self.shared.server_info.read().await.clone()
    }

    /// The name this client advertises during initialize.
    pub fn name(&self) -> &str {
        &self.shared.client_info.name
    }

    /// Register a callback fired when the server announces a changed tool
    /// list.  The internal tool cache is invalidated before callbacks run.
    pub async fn on_tools_list_changed(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared
            .tools_changed_callbacks
            .write()
            .await
            .push(Box::new(callback));
    }

    /// Register a callback fired when the server's resource list changes.
    pub async fn on_resources_list_changed(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared
            .resources_changed_callbacks
            .write()
            .await
            .push(Box::new(callback));
    }

    /// Register a callback fired when a subscribed resource changes.
    pub async fn on_resource_updated(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.shared
            .resource_updated_callbacks
            .write()
            .await
            .push(Box::new(callback));
    }

    /// Open the transport and run the initialize handshake.
    ///
    /// On success the client is `Operational`.  If the server never
    /// answers within the connection timeout the client transitions to
    /// `Failed` and the call returns [`TimeoutError::Connection`]; the
    /// client is not retried automatically.
    pub async fn connect(&self, mut transport: Box<dyn Transport>) -> Result<(), AgentError> {
        {
            let mut state = self.shared.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(AgentError::Protocol(format!(
                    "connect called in state {}",
                    state
                )));
            }
            *state = ConnectionState::Connecting;
        }

        let inbound = match transport.start().await {
            Ok(inbound) => inbound,
            Err(err) => {
                *self.shared.state.write().await = ConnectionState::Failed;
                return Err(err.into());
            }
        };
        *self.shared.transport.lock().await = Some(transport);
        *self.router.lock().await = Some(spawn_router(self.shared.clone(), inbound));

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: self.shared.client_info.clone(),
        };
        let result = self
            .request(
                methods::INITIALIZE,
                Some(serde_json::to_value(&params)?),
                self.connection_timeout,
            )
            .await
            .map_err(|err| match err {
                AgentError::Timeout(TimeoutError::Request(d)) => {
                    AgentError::Timeout(TimeoutError::Connection(d))
                }
                other => other,
            });

        let init: InitializeResult = match result.and_then(|v| Ok(serde_json::from_value(v)?)) {
            Ok(init) => init,
            Err(err) => {
                *self.shared.state.write().await = ConnectionState::Failed;
                return Err(err);
            }
        };

        *self.shared.server_capabilities.write().await = Some(init.capabilities);
        *self.shared.server_info.write().await = Some(init.server_info);
        *self.shared.state.write().await = ConnectionState::Initialized;

        let initialized = Notification::new(methods::NOTIFICATION_INITIALIZED, None);
        self.shared.send_raw(&initialized.to_bytes()).await?;
        *self.shared.state.write().await = ConnectionState::Operational;
        log::info!(
            "MCP client {} connected to {}",
            self.shared.client_info.name,
            self.shared
                .server_info
                .read()
                .await
                .as_ref()
                .map(|i| i.name.as_str())
                .unwrap_or("unknown server")
        );
        Ok(())
    }

    /// Close the transport.  In-flight requests complete with
    /// [`AgentError::Cancelled`].
    pub async fn disconnect(&self) -> Result<(), AgentError> {
        *self.shared.state.write().await = ConnectionState::ShuttingDown;
        self.shared.fail_pending(|| AgentError::Cancelled).await;
        if let Some(mut transport) = self.shared.transport.lock().await.take() {
            let _ = transport.close().await;
        }
        if let Some(router) = self.router.lock().await.take() {
            router.abort();
        }
        *self.shared.state.write().await = ConnectionState::Disconnected;
        Ok(())
    }

    /// The cached tool list, fetching it when the cache is cold.
    ///
    /// The cache stays valid until a `tools/list_changed` notification
    /// arrives.  Two calls without an intervening notification return
    /// equal lists without touching the wire.
    pub async fn tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
        Ok(self
            .tool_descriptors()
            .await?
            .iter()
            .map(McpTool::to_tool_definition)
            .collect())
    }

    /// The raw tool descriptors behind [`tools`](Self::tools).
    pub async fn tool_descriptors(&self) -> Result<Vec<McpTool>, AgentError> {
        self.ensure_operational().await?;
        if let Some(cached) = self.shared.tools_cache.read().await.clone() {
            return Ok(cached);
        }
        let value = self
            .request(methods::TOOLS_LIST, None, self.shared.request_timeout)
            .await?;
        let listing: ListToolsResult = serde_json::from_value(value)?;
        *self.shared.tools_cache.write().await = Some(listing.tools.clone());
        Ok(listing.tools)
    }

    /// Invoke a tool and return its content items in order.
    ///
    /// Items of kind `resource` with a `file://` URI and no inline text
    /// get the file contents attached before the result is returned.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<Content>, AgentError> {
        self.ensure_operational().await?;
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let value = self
            .request(
                methods::TOOLS_CALL,
                Some(serde_json::to_value(&params)?),
                self.shared.request_timeout,
            )
            .await?;
        let result: CallToolResult = serde_json::from_value(value)?;
        if result.is_error.unwrap_or(false) {
            let detail = result
                .content
                .iter()
                .filter_map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ToolError::ExecutionFailed(detail).into());
        }
        Ok(attach_file_resources(result.content).await)
    }

    /// List the resources published by the server.
    pub async fn resources(&self) -> Result<Vec<ResourceDescriptor>, AgentError> {
        self.ensure_operational().await?;
        let value = self
            .request(methods::RESOURCES_LIST, None, self.shared.request_timeout)
            .await?;
        let listing: ListResourcesResult = serde_json::from_value(value)?;
        Ok(listing.resources)
    }

    /// Read one resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, AgentError> {
        self.ensure_operational().await?;
        let params = ResourceUriParams {
            uri: uri.to_string(),
        };
        let value = self
            .request(
                methods::RESOURCES_READ,
                Some(serde_json::to_value(&params)?),
                self.shared.request_timeout,
            )
            .await?;
        let result: ReadResourceResult = serde_json::from_value(value)?;
        Ok(result.contents)
    }

    /// Subscribe to update notifications for one resource.
    pub async fn subscribe(&self, uri: &str) -> Result<(), AgentError> {
        self.resource_subscription(methods::RESOURCES_SUBSCRIBE, uri).await
    }

    /// Drop the update subscription for one resource.
    pub async fn unsubscribe(&self, uri: &str) -> Result<(), AgentError> {
        self.resource_subscription(methods::RESOURCES_UNSUBSCRIBE, uri).await
    }

    async fn resource_subscription(&self, method: &str, uri: &str) -> Result<(), AgentError> {
        self.ensure_operational().await?;
        let params = ResourceUriParams {
            uri: uri.to_string(),
        };
        self.request(
            method,
            Some(serde_json::to_value(&params)?),
            self.shared.request_timeout,
        )
        .await?;
        Ok(())
    }

    async fn ensure_operational(&self) -> Result<(), AgentError> {
        let state = *self.shared.state.read().await;
        if state != ConnectionState::Operational {
            return Err(AgentError::Protocol(format!(
                "operation requires an operational client, state is {}",
                state
            )));
        }
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, AgentError> {
        let id = self.shared.ids.next();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id.clone(), tx);

        let request = Request::new(id.clone(), method, params);
        if let Err(err) = self.shared.send_raw(&request.to_bytes()).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(response))) => response.into_result().map_err(|error| {
                AgentError::Protocol(format!("server error {}: {}", error.code, error.message))
            }),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(TimeoutError::Request(timeout).into())
            }
        }
    }
}

fn spawn_router(shared: Arc<ClientShared>, mut inbound: InboundStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbound.next().await {
            match JsonRpcMessage::from_slice(&frame) {
                Ok(JsonRpcMessage::Response(response)) => match response.id.clone() {
                    Some(id) => {
                        let sender = shared.pending.lock().await.remove(&id);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(Ok(response));
                            }
                            None => log::warn!("response for unknown request id {}", id),
                        }
                    }
                    None => log::warn!("discarding response without id"),
                },
                Ok(JsonRpcMessage::Notification(notification)) => {
                    shared.handle_notification(notification).await;
                }
                Ok(JsonRpcMessage::Request(request)) => {
                    // Server-initiated requests are not supported.
                    let response = Response::error(
                        Some(request.id),
                        ErrorObject::method_not_found(&request.method),
                    );
                    let _ = shared.send_raw(&response.to_bytes()).await;
                }
                Err(err) => log::warn!("discarding undecodable frame: {}", err),
            }
        }

        // Inbound stream ended.  A deliberate shutdown completes pending
        // requests with Cancelled; anything else means the peer went away.
        let state = *shared.state.read().await;
        match state {
            ConnectionState::ShuttingDown | ConnectionState::Disconnected => {
                shared.fail_pending(|| AgentError::Cancelled).await;
            }
            _ => {
                shared
                    .fail_pending(|| {
                        TransportError::ProcessTerminated(
                            "server closed the stream".to_string(),
                        )
                        .into()
                    })
                    .await;
                *shared.state.write().await = ConnectionState::Failed;
            }
        }
    })
}

/// Attach file contents to `file://` resource items that lack inline text.
async fn attach_file_resources(content: Vec<Content>) -> Vec<Content> {
    let mut enriched = Vec::with_capacity(content.len());
    for item in content {
        match item {
            Content::Resource {
                uri,
                mime_type,
                text: None,
            } if uri.starts_with("file://") => {
                let path = uri.trim_start_matches("file://");
                let text = tokio::fs::read_to_string(path).await.ok();
                if text.is_none() {
                    log::warn!("resource {} could not be read from disk", uri);
                }
                enriched.push(Content::Resource {
                    uri,
                    mime_type,
                    text,
                });
            }
            other => enriched.push(other),
        }
    }
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc::pipe::PipeTransport;
    use serde_json::json;

    /// Drive the server side of a pipe pair with canned handlers.
    fn scripted_server(
        mut transport: PipeTransport,
        handler: impl Fn(Request) -> Option<Response> + Send + 'static,
    ) {
        tokio::spawn(async move {
            let mut inbound = transport.start().await.unwrap();
            while let Some(frame) = inbound.next().await {
                if let Ok(JsonRpcMessage::Request(request)) = JsonRpcMessage::from_slice(&frame) {
                    if let Some(response) = handler(request) {
                        transport.send(&response.to_bytes()).await.unwrap();
                    }
                }
            }
        });
    }

    fn initialize_response(id: RequestId) -> Response {
        Response::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": "scripted", "version": "0.0.1"}
            }),
        )
    }

    #[tokio::test]
    async fn test_connect_reaches_operational() {
        let (client_side, server_side) = PipeTransport::pair();
        scripted_server(server_side, |request| match request.method.as_str() {
            "initialize" => Some(initialize_response(request.id)),
            _ => None,
        });

        let client = McpClient::new("test", "0.0.0");
        client.connect(Box::new(client_side)).await.unwrap();
        assert_eq!(client.state().await, ConnectionState::Operational);
        assert_eq!(client.server_info().await.unwrap().name, "scripted");
        assert!(client
            .server_capabilities()
            .await
            .unwrap()
            .tools
            .is_some());
    }

    #[tokio::test]
    async fn test_silent_server_fails_connect() {
        let (client_side, server_side) = PipeTransport::pair();
        // Server reads but never answers.
        scripted_server(server_side, |_| None);

        let client = McpClient::with_timeouts(
            "test",
            "0.0.0",
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        let err = client.connect(Box::new(client_side)).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Timeout(TimeoutError::Connection(_))
        ));
        assert_eq!(client.state().await, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_tool_call_before_connect_is_protocol_error() {
        let client = McpClient::new("test", "0.0.0");
        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_tools_are_cached_until_list_changed() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static LIST_CALLS: AtomicUsize = AtomicUsize::new(0);
        LIST_CALLS.store(0, Ordering::SeqCst);

        let (client_side, server_side) = PipeTransport::pair();
        scripted_server(server_side, |request| match request.method.as_str() {
            "initialize" => Some(initialize_response(request.id)),
            "tools/list" => {
                LIST_CALLS.fetch_add(1, Ordering::SeqCst);
                Some(Response::success(
                    request.id,
                    json!({"tools": [{"name": "echo", "inputSchema": {"type": "object"}}]}),
                ))
            }
            _ => None,
        });

        let client = McpClient::new("test", "0.0.0");
        client.connect(Box::new(client_side)).await.unwrap();

        let first = client.tools().await.unwrap();
        let second = client.tools().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.len(), second.len());
        assert_eq!(LIST_CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_in_flight_requests() {
        let (client_side, server_side) = PipeTransport::pair();
        // The server answers initialize and then goes silent.
        scripted_server(server_side, |request| match request.method.as_str() {
            "initialize" => Some(initialize_response(request.id)),
            _ => None,
        });

        let client = Arc::new(McpClient::with_timeouts(
            "test",
            "0.0.0",
            Duration::from_secs(5),
            Duration::from_secs(5),
        ));
        client.connect(Box::new(client_side)).await.unwrap();

        let caller = client.clone();
        let in_flight =
            tokio::spawn(async move { caller.call_tool("echo", json!({})).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.disconnect().await.unwrap();
        let result = in_flight.await.unwrap();
        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_server_death_fails_in_flight_call() {
        let (client_side, server_side) = PipeTransport::pair();
        let mut server_side = server_side;
        let server = tokio::spawn(async move {
            let mut inbound = server_side.start().await.unwrap();
            // Answer initialize, then die on the next request.
            while let Some(frame) = inbound.next().await {
                if let Ok(JsonRpcMessage::Request(request)) = JsonRpcMessage::from_slice(&frame) {
                    match request.method.as_str() {
                        "initialize" => {
                            let response = initialize_response(request.id);
                            server_side.send(&response.to_bytes()).await.unwrap();
                        }
                        _ => {
                            server_side.close().await.unwrap();
                            return;
                        }
                    }
                }
            }
        });

        let client = McpClient::new("test", "0.0.0");
        client.connect(Box::new(client_side)).await.unwrap();

        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Transport(TransportError::ProcessTerminated(_))
                | AgentError::Transport(TransportError::Closed)
        ));
        server.await.unwrap();
    }
}
