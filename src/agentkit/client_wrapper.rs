//! Shared primitives for provider-agnostic LLM clients.
//!
//! Applications interact with the orchestration layer through the
//! [`ClientWrapper`] trait and the lightweight data types defined in this
//! module.  The trait abstracts over concrete vendor implementations while
//! the supporting structs describe chat messages, tool calls, and streaming
//! chunks.  Vendor SDK bindings live outside this crate; anything that can
//! answer a chat request can sit behind the trait.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use agentkit::client_wrapper::{ClientWrapper, Message};
//!
//! # async fn demo(client: std::sync::Arc<dyn ClientWrapper>) -> Result<(), agentkit::AgentError> {
//! let response = client
//!     .send_message(&[Message::user("Who are you?")], None)
//!     .await?;
//! println!("Assistant: {}", response.content);
//! # Ok(())
//! # }
//! ```

use std::error::Error;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agentkit::error::AgentError;
use crate::agentkit::tool_protocol::ToolDefinition;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message (frequently a mirror of a human end-user request).
    User,
    /// An assistant authored message (model responses).
    Assistant,
    /// A tool-result message correlating with a prior assistant [`ToolCall`].
    Tool,
}

/// A single tool call produced by the LLM.
///
/// Providers usually assign an opaque [`id`](ToolCall::id) so the tool
/// result can be correlated back in a follow-up tool-role message.  Calls
/// extracted from plain text have no id yet; the dispatching layer assigns
/// `call_<uuid>` before execution.
///
/// # Example
///
/// ```rust
/// use agentkit::client_wrapper::ToolCall;
///
/// let tc = ToolCall {
///     id: Some("call_abc123".to_string()),
///     name: "search".to_string(),
///     arguments: serde_json::json!({"query": "rust lifetimes"}),
/// };
/// assert_eq!(tc.name, "search");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, e.g. `"call_abc123"`.  `None` until the
    /// dispatch layer generates one.
    pub id: Option<String>,
    /// Tool name matching one of the definitions sent with the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a call without an id (textual extraction path).
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    /// Return a copy guaranteed to carry an id, generating `call_<uuid>`
    /// when the LLM omitted one.
    pub fn with_ensured_id(mut self) -> Self {
        if self.id.is_none() {
            self.id = Some(format!("call_{}", Uuid::new_v4()));
        }
        self
    }
}

/// A conversation message, immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier assigned at construction.
    pub id: Uuid,
    /// The role associated with the message.
    pub role: Role,
    /// The message body.
    pub content: String,
    /// Tool calls requested by the assistant.  Non-empty only on assistant
    /// messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool-role messages, the id of the originating call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Build an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Build an assistant message carrying tool calls.
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::with_role(Role::Assistant, content);
        message.tool_calls = tool_calls;
        message
    }

    /// Build a tool-result message correlated to `tool_call_id`.
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut message = Self::with_role(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }
}

/// Capabilities an adapter may declare.
///
/// The tool-aware proxy probes membership at runtime instead of relying on
/// concrete adapter types: an adapter that declares [`Tools`] receives
/// native tool definitions, one that does not gets a textual catalog in
/// its system prompt.
///
/// [`Tools`]: AdapterCapability::Tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterCapability {
    /// Plain chat completion.
    Completion,
    /// Native tool/function calling.
    Tools,
    /// Image generation; drives A2A output-modality selection.
    ImageGeneration,
    /// Incremental streaming responses.
    Streaming,
}

/// Represents a chunk of content in a streaming response.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    /// The incremental content delta in this chunk.  May be empty for
    /// chunks that only carry a finish reason or tool calls.
    pub content: String,
    /// Optional finish reason mirroring the provider completion status
    /// (e.g. `"stop"`, `"tool_calls"`).
    pub finish_reason: Option<String>,
    /// Tool calls, surfaced on the final chunk by adapters that stream
    /// native tool invocations.
    pub tool_calls: Vec<ToolCall>,
}

impl MessageChunk {
    /// A plain content delta.
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
            tool_calls: Vec::new(),
        }
    }
}

/// Type alias for a stream of message chunks compatible with `Send` executors.
pub type MessageChunkStream =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, Box<dyn Error + Send + Sync>>> + Send>>;

/// Trait-driven abstraction for a concrete LLM backend.
///
/// A [`ClientWrapper`] translates toolkit requests into a provider specific
/// wire format and returns responses in a uniform shape.  The abstraction
/// deliberately excludes conversation bookkeeping: for that functionality
/// see [`crate::Orchestrator`].
///
/// All implementations **must** be thread-safe (`Send + Sync`) so they can
/// be shared between async tasks.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion.
    ///
    /// The `messages` slice must include any system priming messages the
    /// caller wishes to send.  `tools` carries native [`ToolDefinition`]s
    /// for adapters that declare the [`AdapterCapability::Tools`]
    /// capability; other adapters may ignore it.
    ///
    /// On success the returned [`Message`] may carry non-empty
    /// [`Message::tool_calls`] when the provider selected one or more
    /// tools.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, AgentError>;

    /// Request a streaming response from the provider.
    ///
    /// Implementors in front of providers without streaming support can
    /// inherit the default implementation which resolves to `Ok(None)`.
    /// A `Some(MessageChunkStream)` return value must yield chunks that
    /// mirror the incremental tokens supplied by the upstream service.
    async fn send_message_stream(
        &self,
        _messages: &[Message],
        _tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Option<MessageChunkStream>, AgentError> {
        Ok(None)
    }

    /// Return the identifier used to select the upstream model.
    fn model_name(&self) -> &str;

    /// The capability set this adapter declares.
    fn capabilities(&self) -> Vec<AdapterCapability> {
        vec![AdapterCapability::Completion]
    }

    /// Convenience membership probe.
    fn has_capability(&self, capability: AdapterCapability) -> bool {
        self.capabilities().contains(&capability)
    }
}
