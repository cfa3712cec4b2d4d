//! MCP server.
//!
//! Aggregates registered tools and resources behind the MCP JSON-RPC
//! surface and serves them over any [`Transport`].  Handler failures are
//! mapped to JSON-RPC application errors; they never take the server down.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentkit::mcp::server::McpServer;
//! use agentkit::mcp::types::{Content, McpTool};
//! use std::sync::Arc;
//!
//! # async {
//! let server = McpServer::new("echo-server", "0.1.0");
//! server.register_tool(
//!     McpTool {
//!         name: "echo".to_string(),
//!         description: Some("Echoes text".to_string()),
//!         input_schema: serde_json::json!({
//!             "type": "object",
//!             "properties": {"text": {"type": "string"}},
//!             "required": ["text"]
//!         }),
//!     },
//!     Arc::new(|args| Box::pin(async move {
//!         Ok(vec![Content::text(args["text"].as_str().unwrap_or_default())])
//!     })),
//! ).await;
//! # };
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use rpc::jsonrpc::{error_codes, ErrorObject, JsonRpcMessage, Notification, Request, Response};
use rpc::transport::Transport;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

use crate::agentkit::error::AgentError;
use crate::agentkit::mcp::types::{
    methods, CallToolParams, CallToolResult, Content, Implementation, InitializeResult,
    ListResourcesResult, ListToolsResult, McpTool, ReadResourceResult, ResourceContents,
    ResourceDescriptor, ResourcesCapability, ResourceUriParams, ServerCapabilities,
    ToolsCapability, PROTOCOL_VERSION,
};

/// Async handler invoked for `tools/call`.
pub type ToolHandler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Vec<Content>, AgentError>> + Send>>
        + Send
        + Sync,
>;

/// Async reader invoked for `resources/read`.
pub type ResourceReader = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<Vec<ResourceContents>, AgentError>> + Send>>
        + Send
        + Sync,
>;

struct ServerInner {
    server_info: Implementation,
    tools: RwLock<HashMap<String, (McpTool, ToolHandler)>>,
    resources: RwLock<HashMap<String, (ResourceDescriptor, ResourceReader)>>,
    subscriptions: RwLock<HashSet<String>>,
    /// Sink for server-initiated notifications while a serve loop runs.
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    /// Fan-out of notification frames for transports without a standing
    /// connection (the HTTP adapter's SSE stream).
    notifications: broadcast::Sender<Vec<u8>>,
}

/// Server half of the MCP runtime.
///
/// Cloning is cheap; clones share the registered tools and resources, so a
/// single logical server can be served over several transports (stdio and
/// HTTP, typically).
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl McpServer {
    /// Create a server advertising `name`/`version`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                server_info: Implementation {
                    name: name.into(),
                    version: version.into(),
                },
                tools: RwLock::new(HashMap::new()),
                resources: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(HashSet::new()),
                outbound: Mutex::new(None),
                notifications: broadcast::channel(64).0,
            }),
        }
    }

    /// Register (or replace) a tool and its handler.
    pub async fn register_tool(&self, tool: McpTool, handler: ToolHandler) {
        self.inner
            .tools
            .write()
            .await
            .insert(tool.name.clone(), (tool, handler));
        self.notify_tools_list_changed().await;
    }

    /// Remove a tool.
    pub async fn unregister_tool(&self, name: &str) {
        self.inner.tools.write().await.remove(name);
        self.notify_tools_list_changed().await;
    }

    /// Register (or replace) a resource and its reader.
    pub async fn register_resource(&self, descriptor: ResourceDescriptor, reader: ResourceReader) {
        self.inner
            .resources
            .write()
            .await
            .insert(descriptor.uri.clone(), (descriptor, reader));
        self.emit(Notification::new(
            methods::NOTIFICATION_RESOURCES_LIST_CHANGED,
            None,
        ))
        .await;
    }

    /// Number of registered tools.
    pub async fn tool_count(&self) -> usize {
        self.inner.tools.read().await.len()
    }

    /// Emit `notifications/resources/updated` for a subscribed URI.
    ///
    /// No-op when nobody subscribed to the URI or no serve loop is active.
    pub async fn notify_resource_updated(&self, uri: &str) {
        if !self.inner.subscriptions.read().await.contains(uri) {
            return;
        }
        let notification = Notification::new(
            methods::NOTIFICATION_RESOURCES_UPDATED,
            Some(serde_json::json!({ "uri": uri })),
        );
        self.emit(notification).await;
    }

    /// Emit `notifications/tools/list_changed`.
    pub async fn notify_tools_list_changed(&self) {
        let notification = Notification::new(methods::NOTIFICATION_TOOLS_LIST_CHANGED, None);
        self.emit(notification).await;
    }

    async fn emit(&self, notification: Notification) {
        let frame = notification.to_bytes();
        if let Some(tx) = self.inner.outbound.lock().await.clone() {
            let _ = tx.send(frame.clone()).await;
        }
        // Fan out to SSE listeners; a send error only means nobody is
        // listening right now.
        let _ = self.inner.notifications.send(frame);
    }

    /// Subscribe to the server's notification frames.  Used by the HTTP
    /// adapter to feed its `GET /mcp` SSE stream; each frame is a complete
    /// JSON-RPC notification.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inner.notifications.subscribe()
    }

    /// Serve one transport until its peer disconnects.
    ///
    /// Outbound traffic (responses and notifications) is serialized
    /// through a single writer task so interleaving never corrupts frames.
    pub async fn serve(&self, mut transport: Box<dyn Transport>) -> Result<(), AgentError> {
        let mut inbound = transport.start().await?;
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        *self.inner.outbound.lock().await = Some(tx.clone());

        let transport = Arc::new(transport);
        let writer_transport = transport.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = writer_transport.send(&frame).await {
                    log::debug!("server writer stopped: {}", err);
                    break;
                }
            }
        });

        while let Some(frame) = inbound.next().await {
            match JsonRpcMessage::from_slice(&frame) {
                Ok(message) => {
                    if let Some(response) = self.handle_message(message).await {
                        if tx.send(response.to_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    log::warn!("undecodable frame: {}", err);
                    let response = Response::error(
                        None,
                        ErrorObject::new(error_codes::PARSE_ERROR, "Parse error"),
                    );
                    if tx.send(response.to_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        }

        *self.inner.outbound.lock().await = None;
        drop(tx);
        let _ = writer.await;
        log::info!("MCP server {} stopped serving", self.inner.server_info.name);
        Ok(())
    }

    /// Dispatch one decoded message; `None` means nothing to send back.
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<Response> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request).await),
            JsonRpcMessage::Notification(notification) => {
                if notification.method != methods::NOTIFICATION_INITIALIZED {
                    log::debug!("ignoring notification {}", notification.method);
                }
                None
            }
            JsonRpcMessage::Response(_) => {
                log::debug!("ignoring stray response frame");
                None
            }
        }
    }

    async fn handle_request(&self, request: Request) -> Response {
        let id = request.id.clone();
        let result = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize().await,
            methods::TOOLS_LIST => self.handle_tools_list().await,
            methods::TOOLS_CALL => self.handle_tools_call(request.params).await,
            methods::RESOURCES_LIST => self.handle_resources_list().await,
            methods::RESOURCES_READ => self.handle_resources_read(request.params).await,
            methods::RESOURCES_SUBSCRIBE => {
                self.handle_subscription(request.params, true).await
            }
            methods::RESOURCES_UNSUBSCRIBE => {
                self.handle_subscription(request.params, false).await
            }
            other => Err(ErrorObject::method_not_found(other)),
        };
        match result {
            Ok(value) => Response::success(id, value),
            Err(error) => Response::error(Some(id), error),
        }
    }

    async fn handle_initialize(&self) -> Result<Value, ErrorObject> {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
                resources: Some(ResourcesCapability {
                    subscribe: Some(true),
                    list_changed: Some(true),
                }),
            },
            server_info: self.inner.server_info.clone(),
        };
        serde_json::to_value(&result).map_err(|e| ErrorObject::internal(e.to_string()))
    }

    async fn handle_tools_list(&self) -> Result<Value, ErrorObject> {
        let tools: Vec<McpTool> = self
            .inner
            .tools
            .read()
            .await
            .values()
            .map(|(tool, _)| tool.clone())
            .collect();
        serde_json::to_value(&ListToolsResult { tools })
            .map_err(|e| ErrorObject::internal(e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: CallToolParams = decode_params(params)?;
        let handler = {
            let tools = self.inner.tools.read().await;
            tools.get(&params.name).map(|(_, handler)| handler.clone())
        };
        let handler = handler.ok_or_else(|| {
            ErrorObject::new(
                error_codes::APPLICATION_ERROR_MAX,
                format!("Unknown tool: {}", params.name),
            )
        })?;

        let arguments = params.arguments.unwrap_or_else(|| Value::Object(Default::default()));
        match handler(arguments).await {
            Ok(content) => {
                let result = CallToolResult {
                    content,
                    is_error: None,
                };
                serde_json::to_value(&result).map_err(|e| ErrorObject::internal(e.to_string()))
            }
            Err(err) => {
                log::warn!("tool {} failed: {}", params.name, err);
                Err(ErrorObject::new(
                    error_codes::APPLICATION_ERROR_MAX,
                    err.to_string(),
                ))
            }
        }
    }

    async fn handle_resources_list(&self) -> Result<Value, ErrorObject> {
        let resources: Vec<ResourceDescriptor> = self
            .inner
            .resources
            .read()
            .await
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect();
        serde_json::to_value(&ListResourcesResult { resources })
            .map_err(|e| ErrorObject::internal(e.to_string()))
    }

    async fn handle_resources_read(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: ResourceUriParams = decode_params(params)?;
        let reader = {
            let resources = self.inner.resources.read().await;
            resources.get(&params.uri).map(|(_, reader)| reader.clone())
        };
        let reader = reader.ok_or_else(|| {
            ErrorObject::new(
                error_codes::APPLICATION_ERROR_MAX,
                format!("Unknown resource: {}", params.uri),
            )
        })?;
        match reader().await {
            Ok(contents) => serde_json::to_value(&ReadResourceResult { contents })
                .map_err(|e| ErrorObject::internal(e.to_string())),
            Err(err) => Err(ErrorObject::new(
                error_codes::APPLICATION_ERROR_MAX,
                err.to_string(),
            )),
        }
    }

    async fn handle_subscription(
        &self,
        params: Option<Value>,
        subscribe: bool,
    ) -> Result<Value, ErrorObject> {
        let params: ResourceUriParams = decode_params(params)?;
        if subscribe {
            if !self.inner.resources.read().await.contains_key(&params.uri) {
                return Err(ErrorObject::new(
                    error_codes::APPLICATION_ERROR_MAX,
                    format!("Unknown resource: {}", params.uri),
                ));
            }
            self.inner.subscriptions.write().await.insert(params.uri);
        } else {
            self.inner.subscriptions.write().await.remove(&params.uri);
        }
        Ok(Value::Object(Default::default()))
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorObject> {
    let params = params.ok_or_else(|| ErrorObject::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|e| ErrorObject::invalid_params(e.to_string()))
}
