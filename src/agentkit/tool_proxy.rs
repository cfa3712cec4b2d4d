//! Tool-aware adapter pipeline.
//!
//! [`ToolAwareProxy`] wraps a base LLM adapter and turns it into a
//! tool-using one: it aggregates definitions from every registered
//! provider, presents them to the LLM (natively when the adapter declares
//! the `Tools` capability, otherwise as a textual catalog in the system
//! prompt), extracts tool calls from the response, routes them to the
//! owning provider, feeds results back as tool-role messages, and repeats
//! until the LLM answers without tool calls.
//!
//! The concrete providers for the two federated backends live here too:
//! [`McpToolProvider`] in front of a set of MCP clients and
//! [`A2aToolProvider`] in front of peer A2A agents.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentkit::tool_proxy::ToolAwareProxy;
//! use agentkit::tool_protocol::ToolManager;
//! use std::sync::Arc;
//!
//! # async fn demo(base: Arc<dyn agentkit::ClientWrapper>, manager: ToolManager) {
//! let proxy = ToolAwareProxy::new(base, Arc::new(manager));
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;

use crate::agentkit::a2a::client::A2AClient;
use crate::agentkit::a2a::types::{A2AMessage, MessageSendParams, SendMessageResult, TaskState};
use crate::agentkit::client_wrapper::{
    AdapterCapability, ClientWrapper, Message, MessageChunk, MessageChunkStream, ToolCall,
};
use crate::agentkit::error::{AgentError, ToolError};
use crate::agentkit::mcp::client::McpClient;
use crate::agentkit::mcp::types::Content;
use crate::agentkit::tool_protocol::{
    ToolDefinition, ToolManager, ToolParameter, ToolParameterType, ToolProvider, ToolResult,
};

/// Default limit on tool-call rounds per request.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Tool provider in front of one or more MCP clients.
///
/// Clients are searched in registration order; the first whose cached tool
/// list contains the requested name executes the call.
pub struct McpToolProvider {
    clients: Vec<Arc<McpClient>>,
}

impl McpToolProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    /// Register a connected client.  Ordering is significant.
    pub fn add_client(&mut self, client: Arc<McpClient>) {
        self.clients.push(client);
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl Default for McpToolProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProvider for McpToolProvider {
    async fn available_tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
        let mut seen = std::collections::HashSet::new();
        let mut tools = Vec::new();
        for client in &self.clients {
            match client.tools().await {
                Ok(definitions) => {
                    for definition in definitions {
                        if seen.insert(definition.name.clone()) {
                            tools.push(definition);
                        }
                    }
                }
                Err(err) => {
                    log::warn!("MCP client {} failed to list tools: {}", client.name(), err);
                }
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, AgentError> {
        let call_id = call.id.clone().unwrap_or_default();
        for client in &self.clients {
            let owns = client
                .tools()
                .await
                .map(|tools| tools.iter().any(|t| t.name == call.name))
                .unwrap_or(false);
            if !owns {
                continue;
            }
            return match client.call_tool(&call.name, call.arguments.clone()).await {
                Ok(content) => Ok(content_to_result(call_id, content)),
                Err(AgentError::Tool(ToolError::ExecutionFailed(detail))) => {
                    Ok(ToolResult::failure(call_id, detail))
                }
                Err(other) => Err(other),
            };
        }
        Err(ToolError::NotFound(call.name.clone()).into())
    }

    fn provider_name(&self) -> &str {
        "mcp"
    }
}

/// Flatten MCP content items into a tool result: text parts join the
/// content string, the full item list rides along as metadata.
fn content_to_result(call_id: String, content: Vec<Content>) -> ToolResult {
    let text = content
        .iter()
        .filter_map(Content::as_text)
        .collect::<Vec<_>>()
        .join("\n");
    let metadata = serde_json::to_value(&content).unwrap_or(Value::Null);
    ToolResult::success(call_id, text).with_metadata(metadata)
}

struct A2aAgentEntry {
    definition: ToolDefinition,
    client: Arc<A2AClient>,
}

/// Tool provider in front of peer A2A agents.
///
/// Each agent surfaces as a single tool (kind `a2aAgent`) named after its
/// card; calling it sends the `message` argument to the peer and returns
/// the peer's reply text.
pub struct A2aToolProvider {
    agents: Vec<A2aAgentEntry>,
}

impl A2aToolProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    /// Register a peer, fetching its card to build the tool definition.
    pub async fn add_agent(&mut self, client: Arc<A2AClient>) -> Result<(), AgentError> {
        let card = client.agent_card().await?;
        let name = sanitize_tool_name(&card.name);
        let definition = ToolDefinition::new(name, card.description.clone())
            .with_parameter(
                ToolParameter::new("message", ToolParameterType::String)
                    .with_description("Message to send to the agent")
                    .required(),
            )
            .as_agent();
        self.agents.push(A2aAgentEntry { definition, client });
        Ok(())
    }
}

impl Default for A2aToolProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize_tool_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[async_trait]
impl ToolProvider for A2aToolProvider {
    async fn available_tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
        Ok(self.agents.iter().map(|a| a.definition.clone()).collect())
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, AgentError> {
        let call_id = call.id.clone().unwrap_or_default();
        let entry = self
            .agents
            .iter()
            .find(|a| a.definition.name == call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let text = match call.arguments.get("message").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => call.arguments.to_string(),
        };
        let params = MessageSendParams {
            message: A2AMessage::user_text(text),
            configuration: None,
        };

        match entry.client.send_message(params).await {
            Ok(SendMessageResult::Message(message)) => {
                Ok(ToolResult::success(call_id, message.text()))
            }
            Ok(SendMessageResult::Task(task)) => {
                let text = task
                    .artifacts
                    .iter()
                    .flatten()
                    .flat_map(|a| a.parts.iter())
                    .filter_map(|p| p.as_text())
                    .collect::<Vec<_>>()
                    .join("\n");
                if task.status.state == TaskState::Failed {
                    let reason = task
                        .status
                        .message
                        .as_ref()
                        .map(A2AMessage::text)
                        .unwrap_or_else(|| "task failed".to_string());
                    Ok(ToolResult::failure(call_id, reason))
                } else {
                    Ok(ToolResult::success(call_id, text)
                        .with_metadata(serde_json::to_value(&task).unwrap_or(Value::Null)))
                }
            }
            Err(err) => Ok(ToolResult::failure(call_id, err.to_string())),
        }
    }

    fn provider_name(&self) -> &str {
        "a2a"
    }
}

/// Extract textual tool calls of the form `name(arg=value, ...)`.
///
/// Only known tool names are scanned, so prose mentioning parentheses does
/// not trigger spurious calls.  Values may be single- or double-quoted;
/// unquoted values are decoded as booleans or numbers when they parse as
/// such.
pub fn parse_text_tool_calls(content: &str, known_names: &[String]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for name in known_names {
        let pattern = format!(r"\b{}\s*\(([^)]*)\)", regex::escape(name));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };
        for captures in re.captures_iter(content) {
            let arguments = parse_call_arguments(captures.get(1).map(|m| m.as_str()).unwrap_or(""));
            calls.push(ToolCall::new(name.clone(), arguments));
        }
    }
    calls
}

fn parse_call_arguments(raw: &str) -> Value {
    let mut object = serde_json::Map::new();
    for pair in split_top_level(raw) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        object.insert(key.to_string(), parse_argument_value(value.trim()));
    }
    Value::Object(object)
}

/// Split on commas that are not inside quotes.
fn split_top_level(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in raw.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                ',' => {
                    parts.push(current.clone());
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_argument_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        return Value::String(trimmed[1..trimmed.len() - 1].to_string());
    }
    if trimmed == "true" {
        return Value::Bool(true);
    }
    if trimmed == "false" {
        return Value::Bool(false);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(trimmed.to_string())
}

/// Render a textual tool catalog for adapters without native tool calling.
pub fn render_tool_catalog(tools: &[ToolDefinition]) -> String {
    let mut catalog = String::from(
        "You can call the following tools by answering with `name(arg=value, ...)`:\n",
    );
    for tool in tools {
        let params = tool
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        catalog.push_str(&format!("- {}({}): {}\n", tool.name, params, tool.description));
    }
    catalog
}

/// LLM adapter wrapper that drives the tool loop.
pub struct ToolAwareProxy {
    base: Arc<dyn ClientWrapper>,
    manager: Arc<ToolManager>,
    max_rounds: usize,
}

impl ToolAwareProxy {
    /// Wrap `base` with tool routing through `manager`.
    pub fn new(base: Arc<dyn ClientWrapper>, manager: Arc<ToolManager>) -> Self {
        Self {
            base,
            manager,
            max_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    /// Override the tool-round limit.
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// The tool manager backing this proxy.
    pub fn manager(&self) -> Arc<ToolManager> {
        self.manager.clone()
    }

    fn uses_native_tools(&self) -> bool {
        self.base.has_capability(AdapterCapability::Tools)
    }

    /// Dispatch one call, never failing the loop: every error becomes a
    /// failed tool result the LLM gets to read.
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let call_id = call.id.clone().unwrap_or_default();
        match self.manager.execute(call).await {
            Ok(result) => result,
            Err(err) => ToolResult::failure(call_id, err.to_string()),
        }
    }

    /// Prime the conversation: textual catalogs go into the system prompt
    /// when the base adapter has no native tool interface.
    async fn primed_conversation(
        &self,
        messages: &[Message],
        definitions: &[ToolDefinition],
    ) -> Vec<Message> {
        let mut conversation = messages.to_vec();
        if !self.uses_native_tools() && !definitions.is_empty() {
            let catalog = render_tool_catalog(definitions);
            match conversation.iter_mut().find(|m| m.role == crate::agentkit::client_wrapper::Role::System) {
                Some(system) => {
                    system.content = format!("{}\n\n{}", system.content, catalog);
                }
                None => conversation.insert(0, Message::system(catalog)),
            }
        }
        conversation
    }

    /// Collect the tool calls of one assistant turn, textual or native.
    fn extract_calls(&self, response: &Message, known_names: &[String]) -> Vec<ToolCall> {
        if !response.tool_calls.is_empty() {
            return response.tool_calls.clone();
        }
        if self.uses_native_tools() {
            return Vec::new();
        }
        parse_text_tool_calls(&response.content, known_names)
    }
}

#[async_trait]
impl ClientWrapper for ToolAwareProxy {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, AgentError> {
        let mut definitions = self.manager.all_tools().await;
        if let Some(extra) = tools {
            for tool in extra {
                if !definitions.iter().any(|d| d.name == tool.name) {
                    definitions.push(tool);
                }
            }
        }
        let known_names: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
        let native_tools = self
            .uses_native_tools()
            .then(|| definitions.clone())
            .filter(|d| !d.is_empty());

        let mut conversation = self.primed_conversation(messages, &definitions).await;

        for _round in 0..self.max_rounds {
            let response = self
                .base
                .send_message(&conversation, native_tools.clone())
                .await?;
            let calls = self.extract_calls(&response, &known_names);
            if calls.is_empty() {
                return Ok(response);
            }

            let calls: Vec<ToolCall> = calls.into_iter().map(ToolCall::with_ensured_id).collect();
            conversation.push(Message::assistant_with_tool_calls(
                response.content.clone(),
                calls.clone(),
            ));
            for call in &calls {
                let result = self.dispatch(call).await;
                conversation.push(Message::tool(
                    result.content.clone(),
                    result.tool_call_id.clone(),
                ));
            }
        }
        Err(ToolError::LoopLimit(self.max_rounds).into())
    }

    async fn send_message_stream(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Option<MessageChunkStream>, AgentError> {
        if !self.base.has_capability(AdapterCapability::Streaming) {
            return Ok(None);
        }

        let mut definitions = self.manager.all_tools().await;
        if let Some(extra) = tools {
            for tool in extra {
                if !definitions.iter().any(|d| d.name == tool.name) {
                    definitions.push(tool);
                }
            }
        }
        let known_names: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
        let native_tools = self
            .uses_native_tools()
            .then(|| definitions.clone())
            .filter(|d| !d.is_empty());
        let conversation = self.primed_conversation(messages, &definitions).await;

        let base = self.base.clone();
        let manager = self.manager.clone();
        let uses_native = self.uses_native_tools();
        let max_rounds = self.max_rounds;

        let stream = async_stream::stream! {
            let mut conversation = conversation;
            let mut round = 0;
            loop {
                if round >= max_rounds {
                    yield Err(Box::new(AgentError::from(ToolError::LoopLimit(max_rounds)))
                        as Box<dyn std::error::Error + Send + Sync>);
                    return;
                }
                round += 1;

                let inner = match base
                    .send_message_stream(&conversation, native_tools.clone())
                    .await
                {
                    Ok(Some(inner)) => inner,
                    Ok(None) => {
                        yield Err(Box::new(AgentError::Protocol(
                            "adapter declared streaming but returned no stream".to_string(),
                        )) as Box<dyn std::error::Error + Send + Sync>);
                        return;
                    }
                    Err(err) => {
                        yield Err(Box::new(err) as Box<dyn std::error::Error + Send + Sync>);
                        return;
                    }
                };

                // Preserve the LLM's chunks while accumulating the turn.
                let mut inner = inner;
                let mut content = String::new();
                let mut calls: Vec<ToolCall> = Vec::new();
                while let Some(chunk) = inner.next().await {
                    match chunk {
                        Ok(chunk) => {
                            content.push_str(&chunk.content);
                            calls.extend(chunk.tool_calls.clone());
                            yield Ok(chunk);
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
                if calls.is_empty() && !uses_native {
                    calls = parse_text_tool_calls(&content, &known_names);
                }
                if calls.is_empty() {
                    return;
                }

                let calls: Vec<ToolCall> =
                    calls.into_iter().map(ToolCall::with_ensured_id).collect();
                conversation.push(Message::assistant_with_tool_calls(content, calls.clone()));
                for call in &calls {
                    let call_id = call.id.clone().unwrap_or_default();
                    let result = match manager.execute(call).await {
                        Ok(result) => result,
                        Err(err) => ToolResult::failure(call_id, err.to_string()),
                    };
                    // Interim signal so consumers can surface tool progress.
                    yield Ok(MessageChunk {
                        content: String::new(),
                        finish_reason: Some("tool_result".to_string()),
                        tool_calls: Vec::new(),
                    });
                    conversation.push(Message::tool(
                        result.content.clone(),
                        result.tool_call_id.clone(),
                    ));
                }
            }
        };
        Ok(Some(Box::pin(stream)))
    }

    fn model_name(&self) -> &str {
        self.base.model_name()
    }

    fn capabilities(&self) -> Vec<AdapterCapability> {
        let mut capabilities = self.base.capabilities();
        if !capabilities.contains(&AdapterCapability::Tools) {
            capabilities.push(AdapterCapability::Tools);
        }
        capabilities
    }
}
