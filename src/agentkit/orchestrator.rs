//! Orchestrator: the `user → LLM → (tool calls → tool results)* → assistant`
//! control loop.
//!
//! The orchestrator owns an ordered conversation and publishes an
//! append-only message stream.  Subscriptions are lazy and independent:
//! cancelling (dropping) a subscription stops delivery to that subscriber
//! without affecting ingestion or other subscribers.
//!
//! Per `update_conversation` invocation the published order is
//! `(assistant chunks)* (tool messages in call order) (next assistant
//! chunks)* ...` — tool-result messages always carry the
//! `tool_call_id` of the originating call.
//!
//! Cancellation: dropping the `update_conversation` future abandons the
//! in-flight LLM call and any outstanding tool dispatches; the
//! conversation keeps the messages already published.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentkit::{Message, Orchestrator};
//! use agentkit::tool_protocol::ToolManager;
//! use futures_util::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn demo(llm: Arc<dyn agentkit::ClientWrapper>) -> Result<(), agentkit::AgentError> {
//! let orchestrator = Orchestrator::new(llm).with_tool_manager(Arc::new(ToolManager::new()));
//! let mut stream = orchestrator.message_stream();
//!
//! tokio::spawn(async move {
//!     while let Some(message) = stream.next().await {
//!         println!("[{:?}] {}", message.role, message.content);
//!     }
//! });
//!
//! let reply = orchestrator
//!     .update_conversation(vec![Message::user("What's 2+2?")], None)
//!     .await?;
//! println!("final: {}", reply.content);
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

use crate::agentkit::client_wrapper::{
    AdapterCapability, ClientWrapper, Message, Role, ToolCall,
};
use crate::agentkit::error::{AgentError, ToolError};
use crate::agentkit::tool_protocol::{ToolDefinition, ToolManager, ToolResult};
use crate::agentkit::tool_proxy::parse_text_tool_calls;

/// Default limit on tool-call rounds per invocation.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Capacity of the published message stream.
const STREAM_CAPACITY: usize = 256;

/// Drives the conversation loop against an LLM adapter and a tool manager.
pub struct Orchestrator {
    client: Arc<dyn ClientWrapper>,
    tool_manager: Arc<ToolManager>,
    conversation: RwLock<Vec<Message>>,
    publisher: broadcast::Sender<Message>,
    streaming: bool,
    max_tool_rounds: usize,
}

impl Orchestrator {
    /// Create an orchestrator around an LLM adapter with no tools.
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        let (publisher, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            client,
            tool_manager: Arc::new(ToolManager::new()),
            conversation: RwLock::new(Vec::new()),
            publisher,
            streaming: false,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    /// Attach the tool manager used for dispatching tool calls.
    pub fn with_tool_manager(mut self, manager: Arc<ToolManager>) -> Self {
        self.tool_manager = manager;
        self
    }

    /// Prefer streaming LLM invocations when the adapter supports them.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Override the tool-round limit.
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// The tool manager backing this orchestrator.
    pub fn tool_manager(&self) -> Arc<ToolManager> {
        self.tool_manager.clone()
    }

    /// Subscribe to the append-only message stream.
    ///
    /// Each subscription delivers every message published after the
    /// subscription was created; dropping the stream ends delivery for
    /// that subscriber only.
    pub fn message_stream(&self) -> Pin<Box<dyn Stream<Item = Message> + Send>> {
        let receiver = self.publisher.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|item| async move {
            match item {
                Ok(message) => Some(message),
                Err(err) => {
                    log::warn!("message stream subscriber lagged: {}", err);
                    None
                }
            }
        }))
    }

    /// Snapshot of the conversation so far.
    pub async fn conversation(&self) -> Vec<Message> {
        self.conversation.read().await.clone()
    }

    async fn publish(&self, message: Message) {
        self.conversation.write().await.push(message.clone());
        // Send fails only when no subscriber exists; ingestion continues.
        let _ = self.publisher.send(message);
    }

    /// Run the loop: invoke the LLM, dispatch tool calls, feed results
    /// back, and terminate on the first assistant message without tool
    /// calls.  Returns that terminal assistant message.
    pub async fn update_conversation(
        &self,
        initial: Vec<Message>,
        available_tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, AgentError> {
        for message in initial {
            self.publish(message).await;
        }

        let mut definitions = self.tool_manager.all_tools().await;
        if let Some(extra) = &available_tools {
            for tool in extra {
                if !definitions.iter().any(|d| d.name == tool.name) {
                    definitions.push(tool.clone());
                }
            }
        }
        let known_names: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
        let tools_param = (!definitions.is_empty()).then(|| definitions.clone());

        for _round in 0..self.max_tool_rounds {
            let response = self.invoke_llm(tools_param.clone()).await?;

            let mut calls = response.tool_calls.clone();
            if calls.is_empty() && !self.client.has_capability(AdapterCapability::Tools) {
                calls = parse_text_tool_calls(&response.content, &known_names);
            }

            if calls.is_empty() {
                let terminal = Message::assistant(response.content.clone());
                self.publish(terminal.clone()).await;
                return Ok(terminal);
            }

            let calls: Vec<ToolCall> = calls.into_iter().map(ToolCall::with_ensured_id).collect();
            self.publish(Message::assistant_with_tool_calls(
                response.content.clone(),
                calls.clone(),
            ))
            .await;

            for call in &calls {
                let result = self.dispatch(call).await;
                self.publish(Message::tool(result.content, result.tool_call_id))
                    .await;
            }
        }

        Err(ToolError::LoopLimit(self.max_tool_rounds).into())
    }

    /// One LLM turn: streaming when configured and supported, falling
    /// back to request/response otherwise.  Streaming publishes partial
    /// assistant messages as chunks arrive.
    async fn invoke_llm(
        &self,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, AgentError> {
        let history = self.conversation.read().await.clone();

        if self.streaming && self.client.has_capability(AdapterCapability::Streaming) {
            if let Some(mut chunks) = self
                .client
                .send_message_stream(&history, tools.clone())
                .await?
            {
                let mut content = String::new();
                let mut tool_calls = Vec::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk =
                        chunk.map_err(|e| AgentError::Protocol(format!("stream error: {}", e)))?;
                    if !chunk.content.is_empty() {
                        content.push_str(&chunk.content);
                        // Partial assistant message: observers see the
                        // delta as it arrives.
                        let partial = Message::assistant(chunk.content.clone());
                        let _ = self.publisher.send(partial);
                    }
                    tool_calls.extend(chunk.tool_calls);
                }
                return Ok(Message::assistant_with_tool_calls(content, tool_calls));
            }
        }

        self.client.send_message(&history, tools).await
    }

    /// Dispatch one call; every failure becomes a failed tool result so
    /// the loop (and the process) survives.
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let call_id = call.id.clone().unwrap_or_default();
        match self.tool_manager.execute(call).await {
            Ok(result) => result,
            Err(err) => {
                log::warn!("tool {} failed: {}", call.name, err);
                ToolResult::failure(call_id, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentkit::tool_protocol::CustomToolProvider;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// LLM that requests one `search` call and then answers "done".
    struct TwoTurnLlm {
        turn: AtomicUsize,
    }

    #[async_trait]
    impl ClientWrapper for TwoTurnLlm {
        async fn send_message(
            &self,
            messages: &[Message],
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<Message, AgentError> {
            if self.turn.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("search", json!({"query": "x"}))],
                ));
            }
            let tool_msg = messages.iter().rfind(|m| m.role == Role::Tool).unwrap();
            assert_eq!(tool_msg.content, "ok");
            Ok(Message::assistant("done"))
        }

        fn model_name(&self) -> &str {
            "two-turn"
        }
    }

    async fn search_manager() -> Arc<ToolManager> {
        let provider = CustomToolProvider::new();
        provider
            .register_tool(
                ToolDefinition::new("search", "Searches"),
                Arc::new(|_| Box::pin(async { Ok("ok".to_string()) })),
            )
            .await;
        let mut manager = ToolManager::new();
        manager.add_provider("local", Arc::new(provider));
        Arc::new(manager)
    }

    #[tokio::test]
    async fn test_tool_loop_publishes_in_order() {
        let orchestrator = Orchestrator::new(Arc::new(TwoTurnLlm {
            turn: AtomicUsize::new(0),
        }))
        .with_tool_manager(search_manager().await);

        let mut stream = orchestrator.message_stream();
        let reply = orchestrator
            .update_conversation(vec![Message::user("find x")], None)
            .await
            .unwrap();
        assert_eq!(reply.content, "done");

        // Published order: user, assistant(with tool calls), tool, assistant.
        let user = stream.next().await.unwrap();
        assert_eq!(user.role, Role::User);

        let assistant = stream.next().await.unwrap();
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.tool_calls.len(), 1);
        let call_id = assistant.tool_calls[0].id.clone().unwrap();
        assert!(call_id.starts_with("call_"));

        let tool = stream.next().await.unwrap();
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.content, "ok");
        assert_eq!(tool.tool_call_id.as_deref(), Some(call_id.as_str()));

        let terminal = stream.next().await.unwrap();
        assert_eq!(terminal.role, Role::Assistant);
        assert_eq!(terminal.content, "done");
    }

    #[tokio::test]
    async fn test_plain_answer_terminates_immediately() {
        struct PlainLlm;
        #[async_trait]
        impl ClientWrapper for PlainLlm {
            async fn send_message(
                &self,
                _messages: &[Message],
                _tools: Option<Vec<ToolDefinition>>,
            ) -> Result<Message, AgentError> {
                Ok(Message::assistant("hello"))
            }
            fn model_name(&self) -> &str {
                "plain"
            }
        }

        let orchestrator = Orchestrator::new(Arc::new(PlainLlm));
        let reply = orchestrator
            .update_conversation(vec![Message::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(reply.content, "hello");
        assert_eq!(orchestrator.conversation().await.len(), 2);
    }

    #[tokio::test]
    async fn test_loop_limit_fails_invocation() {
        struct ForeverToolLlm;
        #[async_trait]
        impl ClientWrapper for ForeverToolLlm {
            async fn send_message(
                &self,
                _messages: &[Message],
                _tools: Option<Vec<ToolDefinition>>,
            ) -> Result<Message, AgentError> {
                Ok(Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("search", json!({}))],
                ))
            }
            fn model_name(&self) -> &str {
                "forever"
            }
        }

        let orchestrator = Orchestrator::new(Arc::new(ForeverToolLlm))
            .with_tool_manager(search_manager().await)
            .with_max_tool_rounds(2);
        let err = orchestrator
            .update_conversation(vec![Message::user("go")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Tool(ToolError::LoopLimit(2))));
    }

    #[tokio::test]
    async fn test_failed_tool_becomes_tool_message() {
        struct OneCallLlm {
            turn: AtomicUsize,
        }
        #[async_trait]
        impl ClientWrapper for OneCallLlm {
            async fn send_message(
                &self,
                messages: &[Message],
                _tools: Option<Vec<ToolDefinition>>,
            ) -> Result<Message, AgentError> {
                if self.turn.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Ok(Message::assistant_with_tool_calls(
                        "",
                        vec![ToolCall::new("absent", json!({}))],
                    ));
                }
                let tool_msg = messages.iter().rfind(|m| m.role == Role::Tool).unwrap();
                assert!(tool_msg.content.contains("absent"));
                Ok(Message::assistant("noted"))
            }
            fn model_name(&self) -> &str {
                "one-call"
            }
        }

        let orchestrator = Orchestrator::new(Arc::new(OneCallLlm {
            turn: AtomicUsize::new(0),
        }));
        let reply = orchestrator
            .update_conversation(vec![Message::user("go")], None)
            .await
            .unwrap();
        assert_eq!(reply.content, "noted");
    }

    #[tokio::test]
    async fn test_dropped_subscription_does_not_stop_ingestion() {
        struct PlainLlm;
        #[async_trait]
        impl ClientWrapper for PlainLlm {
            async fn send_message(
                &self,
                _messages: &[Message],
                _tools: Option<Vec<ToolDefinition>>,
            ) -> Result<Message, AgentError> {
                Ok(Message::assistant("hello"))
            }
            fn model_name(&self) -> &str {
                "plain"
            }
        }

        let orchestrator = Orchestrator::new(Arc::new(PlainLlm));
        let stream = orchestrator.message_stream();
        drop(stream);

        orchestrator
            .update_conversation(vec![Message::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(orchestrator.conversation().await.len(), 2);
    }
}
