//! The full pipeline: orchestrator + tool manager + providers, including
//! MCP-backed tools over a pipe transport and A2A agents as tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agentkit::a2a::client::A2AClient;
use agentkit::a2a::server::{
    A2AServer, AgentAdapter, RequestContext, ResponseShape, TaskEventSink,
};
use agentkit::a2a::types::{
    A2AMessage, AgentCapabilities, AgentCard, MessageSendParams, SendMessageResult,
};
use agentkit::client_wrapper::{ClientWrapper, Message, Role, ToolCall};
use agentkit::error::AgentError;
use agentkit::mcp::client::McpClient;
use agentkit::mcp::server::McpServer;
use agentkit::mcp::types::{Content, McpTool};
use agentkit::tool_protocol::{ToolDefinition, ToolManager};
use agentkit::tool_proxy::{A2aToolProvider, McpToolProvider, ToolAwareProxy};
use agentkit::Orchestrator;
use async_trait::async_trait;
use futures_util::StreamExt;
use rpc::pipe::PipeTransport;
use serde_json::json;

/// LLM that emits `search(query="x")` on turn one and "done" on turn two.
struct SearchThenDoneLlm {
    turn: AtomicUsize,
}

impl SearchThenDoneLlm {
    fn new() -> Self {
        Self {
            turn: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClientWrapper for SearchThenDoneLlm {
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
        let tool_message = messages.iter().rfind(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_message.content, "ok");
        Ok(Message::assistant("done"))
    }

    fn model_name(&self) -> &str {
        "search-then-done"
    }
}

/// Boot an MCP echo/search server on a pipe pair and connect a client.
async fn mcp_search_client() -> Arc<McpClient> {
    let (client_side, server_side) = PipeTransport::pair();
    let server = McpServer::new("search-server", "0.1.0");
    server
        .register_tool(
            McpTool {
                name: "search".to_string(),
                description: Some("Searches".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            },
            Arc::new(|_| Box::pin(async { Ok(vec![Content::text("ok")]) })),
        )
        .await;
    tokio::spawn(async move {
        server.serve(Box::new(server_side)).await.unwrap();
    });

    let client = McpClient::new("pipeline-client", "0.1.0");
    client.connect(Box::new(client_side)).await.unwrap();
    Arc::new(client)
}

#[tokio::test]
async fn test_tool_loop_with_mcp_backed_provider() {
    let mut provider = McpToolProvider::new();
    provider.add_client(mcp_search_client().await);
    let mut manager = ToolManager::new();
    manager.add_provider("mcp", Arc::new(provider));

    let orchestrator = Orchestrator::new(Arc::new(SearchThenDoneLlm::new()))
        .with_tool_manager(Arc::new(manager));
    let mut stream = orchestrator.message_stream();

    let reply = orchestrator
        .update_conversation(vec![Message::user("find x")], None)
        .await
        .unwrap();
    assert_eq!(reply.content, "done");

    // Published order: user, assistant(with tool calls), tool, assistant.
    let roles: Vec<Role> = [
        stream.next().await.unwrap(),
        stream.next().await.unwrap(),
        stream.next().await.unwrap(),
        stream.next().await.unwrap(),
    ]
    .iter()
    .map(|m| m.role)
    .collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
}

#[tokio::test]
async fn test_proxy_drives_textual_llm_through_mcp_tools() {
    let mut provider = McpToolProvider::new();
    provider.add_client(mcp_search_client().await);
    let mut manager = ToolManager::new();
    manager.add_provider("mcp", Arc::new(provider));

    /// Textual LLM: answers with a textual call, then with plain text.
    struct TextualLlm {
        turn: AtomicUsize,
    }
    #[async_trait]
    impl ClientWrapper for TextualLlm {
        async fn send_message(
            &self,
            messages: &[Message],
            tools: Option<Vec<ToolDefinition>>,
        ) -> Result<Message, AgentError> {
            assert!(tools.is_none(), "textual adapters get no native tools");
            if self.turn.fetch_add(1, Ordering::SeqCst) == 0 {
                // The proxy embedded a tool catalog in the system prompt.
                assert!(messages[0].content.contains("search("));
                return Ok(Message::assistant(r#"I'll check: search(query="x")"#));
            }
            Ok(Message::assistant("done"))
        }
        fn model_name(&self) -> &str {
            "textual"
        }
    }

    let proxy = ToolAwareProxy::new(
        Arc::new(TextualLlm {
            turn: AtomicUsize::new(0),
        }),
        Arc::new(manager),
    );
    let response = proxy
        .send_message(&[Message::user("find x")], None)
        .await
        .unwrap();
    assert_eq!(response.content, "done");
}

#[tokio::test]
async fn test_streaming_conversation_preserves_chunks_and_tool_order() {
    use agentkit::client_wrapper::{AdapterCapability, MessageChunk, MessageChunkStream};

    /// Streams "Let me check." plus a tool call on the first turn, then
    /// "done" on the second.
    struct StreamingLlm {
        turn: AtomicUsize,
    }

    #[async_trait]
    impl ClientWrapper for StreamingLlm {
        async fn send_message(
            &self,
            _messages: &[Message],
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<Message, AgentError> {
            panic!("streaming adapter must be driven through the stream path")
        }

        async fn send_message_stream(
            &self,
            _messages: &[Message],
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<Option<MessageChunkStream>, AgentError> {
            let chunks: Vec<Result<MessageChunk, _>> =
                if self.turn.fetch_add(1, Ordering::SeqCst) == 0 {
                    vec![
                        Ok(MessageChunk::delta("Let me ")),
                        Ok(MessageChunk::delta("check.")),
                        Ok(MessageChunk {
                            content: String::new(),
                            finish_reason: Some("tool_calls".to_string()),
                            tool_calls: vec![ToolCall::new("search", json!({"query": "x"}))],
                        }),
                    ]
                } else {
                    vec![Ok(MessageChunk::delta("done"))]
                };
            Ok(Some(Box::pin(futures_util::stream::iter(chunks))))
        }

        fn model_name(&self) -> &str {
            "streaming"
        }

        fn capabilities(&self) -> Vec<AdapterCapability> {
            vec![
                AdapterCapability::Completion,
                AdapterCapability::Tools,
                AdapterCapability::Streaming,
            ]
        }
    }

    let mut provider = McpToolProvider::new();
    provider.add_client(mcp_search_client().await);
    let mut manager = ToolManager::new();
    manager.add_provider("mcp", Arc::new(provider));

    let orchestrator = Orchestrator::new(Arc::new(StreamingLlm {
        turn: AtomicUsize::new(0),
    }))
    .with_tool_manager(Arc::new(manager))
    .with_streaming(true);
    let mut stream = orchestrator.message_stream();

    let reply = orchestrator
        .update_conversation(vec![Message::user("find x")], None)
        .await
        .unwrap();
    assert_eq!(reply.content, "done");

    // user, two partial chunks, assistant with tool calls, tool result,
    // the "done" chunk, terminal assistant message.
    let mut published = Vec::new();
    for _ in 0..7 {
        published.push(stream.next().await.unwrap());
    }
    assert_eq!(published[0].role, Role::User);
    assert_eq!(published[1].content, "Let me ");
    assert_eq!(published[2].content, "check.");
    assert_eq!(published[3].content, "Let me check.");
    assert_eq!(published[3].tool_calls.len(), 1);
    assert_eq!(published[4].role, Role::Tool);
    assert_eq!(published[4].content, "ok");
    assert_eq!(
        published[4].tool_call_id,
        published[3].tool_calls[0].id
    );
    assert_eq!(published[5].content, "done");
    assert_eq!(published[6].role, Role::Assistant);
    assert_eq!(published[6].content, "done");
}

struct UpperCaseAgent;

#[async_trait]
impl AgentAdapter for UpperCaseAgent {
    fn card(&self) -> AgentCard {
        AgentCard {
            name: "shouty".to_string(),
            description: "Uppercases whatever it receives".to_string(),
            version: "0.1.0".to_string(),
            capabilities: AgentCapabilities::default(),
            skills: Vec::new(),
            default_input_modes: vec!["text/plain".to_string()],
            default_output_modes: vec!["text/plain".to_string()],
        }
    }

    fn response_shape(&self, _params: &MessageSendParams) -> ResponseShape {
        ResponseShape::Message
    }

    async fn handle_send(
        &self,
        params: MessageSendParams,
        _context: Option<RequestContext>,
    ) -> Result<SendMessageResult, AgentError> {
        Ok(SendMessageResult::Message(A2AMessage::agent_text(
            params.message.text().to_uppercase(),
        )))
    }

    async fn handle_stream(
        &self,
        _params: MessageSendParams,
        _context: RequestContext,
        _sink: TaskEventSink,
    ) -> Result<(), AgentError> {
        unimplemented!("not exercised")
    }
}

#[tokio::test]
async fn test_a2a_agent_surfaces_as_tool() {
    let server = A2AServer::new(Arc::new(UpperCaseAgent));
    let running = server.serve("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let peer = Arc::new(A2AClient::new(format!("http://{}", running.addr)));

    let mut provider = A2aToolProvider::new();
    provider.add_agent(peer).await.unwrap();
    let mut manager = ToolManager::new();
    manager.add_provider("peers", Arc::new(provider));
    let manager = Arc::new(manager);

    let tools = manager.all_tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "shouty");
    assert_eq!(
        tools[0].kind,
        agentkit::tool_protocol::ToolKind::A2aAgent
    );

    let result = manager
        .execute(
            &ToolCall {
                id: Some("call_peer".to_string()),
                name: "shouty".to_string(),
                arguments: json!({"message": "hello there"}),
            },
        )
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.content, "HELLO THERE");
    assert_eq!(result.tool_call_id, "call_peer");
}
