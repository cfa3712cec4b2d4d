//! Tool Provider Abstraction Layer
//!
//! This module provides the abstraction for connecting agents to tool
//! backends.  A [`ToolProvider`] can sit in front of an MCP server, a peer
//! A2A agent, or plain in-process functions; the [`ToolManager`] aggregates
//! several providers and routes calls transparently.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator → ToolManager → [Provider1, Provider2, Provider3]
//!               (routing, ordered)   ↓          ↓          ↓
//!                                  Local       MCP        A2A
//!                                  functions   server     agent
//! ```
//!
//! Routing is by registration order: when two providers expose the same
//! tool name, the first registered provider wins.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentkit::tool_protocol::{CustomToolProvider, ToolManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut manager = ToolManager::new();
//!     manager.add_provider("local", Arc::new(CustomToolProvider::new()));
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::agentkit::client_wrapper::ToolCall;
use crate::agentkit::error::{AgentError, ToolError};

/// Represents the result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful.
    pub success: bool,
    /// The textual output of the tool.
    pub content: String,
    /// Metadata about the execution (structured output, timing, etc.).
    pub metadata: Value,
    /// Id of the originating tool call; echoed so the orchestrator can
    /// correlate the result message.
    pub tool_call_id: String,
    /// Optional error message if execution failed.
    pub error: Option<String>,
}

impl ToolResult {
    /// Convenience constructor for successful tool execution.
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            metadata: Value::Null,
            tool_call_id: tool_call_id.into(),
            error: None,
        }
    }

    /// Convenience constructor for failed tool execution.
    pub fn failure(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            content: error.clone(),
            metadata: Value::Null,
            tool_call_id: tool_call_id.into(),
            error: Some(error),
        }
    }

    /// Attach structured metadata to the result.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Defines the type of a tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// Defines a parameter for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    /// Define a new tool parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    /// Add a human readable description that will surface in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Whether a tool is an ordinary function or a delegating A2A agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    Function,
    A2aAgent,
}

/// Provider-agnostic tool schema surfaced to LLMs and peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub kind: ToolKind,
}

impl ToolDefinition {
    /// Create a function tool definition with the supplied identifier.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            kind: ToolKind::Function,
        }
    }

    /// Append a parameter definition.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Mark this definition as a delegating A2A agent tool.
    pub fn as_agent(mut self) -> Self {
        self.kind = ToolKind::A2aAgent;
        self
    }

    /// Render the parameter list as a JSON Schema object.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.param_type,
                    "description": param.description.as_deref().unwrap_or(""),
                }),
            );
            if param.required {
                required.push(param.name.clone());
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Derive parameter specs from a JSON Schema object (the MCP
    /// `inputSchema` shape).
    pub fn from_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: &Value,
    ) -> Self {
        let mut definition = Self::new(name, description);
        let required: Vec<&str> = schema["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(properties) = schema["properties"].as_object() {
            for (name, prop) in properties {
                let param_type = match prop["type"].as_str() {
                    Some("number") => ToolParameterType::Number,
                    Some("integer") => ToolParameterType::Integer,
                    Some("boolean") => ToolParameterType::Boolean,
                    Some("array") => ToolParameterType::Array,
                    Some("object") => ToolParameterType::Object,
                    _ => ToolParameterType::String,
                };
                let mut param = ToolParameter::new(name.clone(), param_type);
                if let Some(description) = prop["description"].as_str() {
                    param = param.with_description(description);
                }
                if required.contains(&name.as_str()) {
                    param = param.required();
                }
                definition = definition.with_parameter(param);
            }
        }
        definition
    }
}

/// Trait for tool backends the manager can route calls to.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// The definitions of every tool this provider can currently execute.
    async fn available_tools(&self) -> Result<Vec<ToolDefinition>, AgentError>;

    /// Execute one tool call.  `call.id` is guaranteed non-null by the
    /// dispatching layer.
    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, AgentError>;

    /// Provider identifier (e.g. "mcp", "a2a", "custom").
    fn provider_name(&self) -> &str;
}

/// Aggregates tool providers and routes calls to the owning provider.
///
/// Providers are consulted in registration order; the first provider whose
/// current tool list contains the requested name executes the call.
pub struct ToolManager {
    providers: Vec<(String, Arc<dyn ToolProvider>)>,
}

impl ToolManager {
    /// Create an empty manager ready to accept providers.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Register a provider under a unique label.  Ordering is significant:
    /// earlier registrations win name conflicts.
    pub fn add_provider(&mut self, label: impl Into<String>, provider: Arc<dyn ToolProvider>) {
        self.providers.push((label.into(), provider));
    }

    /// Remove a provider (and implicitly its tools) by label.
    pub fn remove_provider(&mut self, label: &str) {
        self.providers.retain(|(l, _)| l != label);
    }

    /// Labels of every registered provider, in registration order.
    pub fn provider_labels(&self) -> Vec<&str> {
        self.providers.iter().map(|(l, _)| l.as_str()).collect()
    }

    /// Aggregate the definitions of all providers, registration order
    /// first, dropping duplicate names in favor of the earlier provider.
    pub async fn all_tools(&self) -> Vec<ToolDefinition> {
        let mut seen = std::collections::HashSet::new();
        let mut tools = Vec::new();
        for (label, provider) in &self.providers {
            match provider.available_tools().await {
                Ok(definitions) => {
                    for definition in definitions {
                        if seen.insert(definition.name.clone()) {
                            tools.push(definition);
                        }
                    }
                }
                Err(err) => {
                    log::warn!("provider {} failed to list tools: {}", label, err);
                }
            }
        }
        tools
    }

    /// Execute a call on the first provider that owns the named tool.
    ///
    /// Returns [`ToolError::NotFound`] when no provider lists the name.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, AgentError> {
        for (label, provider) in &self.providers {
            let owns = provider
                .available_tools()
                .await
                .map(|tools| tools.iter().any(|t| t.name == call.name))
                .unwrap_or(false);
            if owns {
                log::debug!("routing tool call {} to provider {}", call.name, label);
                return provider.call_tool(call).await;
            }
        }
        Err(ToolError::NotFound(call.name.clone()).into())
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Type alias for asynchronous tool functions exposed via the custom provider.
pub type AsyncToolFunction = Arc<
    dyn Fn(
            Value,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<String, AgentError>> + Send>,
        > + Send
        + Sync,
>;

/// In-process tool provider backed by registered Rust functions.
///
/// Useful for quick prototyping and as the local leg of a federated tool
/// surface.
///
/// # Example
///
/// ```rust,no_run
/// use agentkit::tool_protocol::{CustomToolProvider, ToolDefinition, ToolParameter, ToolParameterType};
/// use std::sync::Arc;
///
/// # async {
/// let provider = CustomToolProvider::new();
/// provider.register_tool(
///     ToolDefinition::new("echo", "Echoes its input")
///         .with_parameter(ToolParameter::new("text", ToolParameterType::String).required()),
///     Arc::new(|params| Box::pin(async move {
///         Ok(params["text"].as_str().unwrap_or_default().to_string())
///     })),
/// ).await;
/// # };
/// ```
pub struct CustomToolProvider {
    tools: Arc<RwLock<HashMap<String, ToolDefinition>>>,
    functions: Arc<RwLock<HashMap<String, AsyncToolFunction>>>,
}

impl CustomToolProvider {
    /// Create an empty provider ready to accept registrations.
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
            functions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an asynchronous tool function.
    ///
    /// Subsequent calls overwrite any existing tool with the same name.
    pub async fn register_tool(&self, definition: ToolDefinition, function: AsyncToolFunction) {
        let name = definition.name.clone();
        self.tools.write().await.insert(name.clone(), definition);
        self.functions.write().await.insert(name, function);
    }

    /// Remove a tool from the provider.
    pub async fn unregister_tool(&self, name: &str) {
        self.tools.write().await.remove(name);
        self.functions.write().await.remove(name);
    }
}

impl Default for CustomToolProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProvider for CustomToolProvider {
    async fn available_tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
        Ok(self.tools.read().await.values().cloned().collect())
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, AgentError> {
        let function = {
            let functions = self.functions.read().await;
            functions.get(&call.name).cloned()
        };
        let function = function.ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let call_id = call.id.clone().unwrap_or_default();

        match function(call.arguments.clone()).await {
            Ok(content) => Ok(ToolResult::success(call_id, content)),
            Err(err) => Ok(ToolResult::failure(call_id, err.to_string())),
        }
    }

    fn provider_name(&self) -> &str {
        "custom"
    }
}
