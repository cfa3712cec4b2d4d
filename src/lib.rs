// src/lib.rs

// Import the top-level `agentkit` module.
pub mod agentkit;

// Re-export the submodules at the crate root so downstream code can write
// agentkit::mcp::McpClient instead of agentkit::agentkit::mcp::McpClient.
pub use agentkit::{a2a, auth, client_wrapper, error, mcp, orchestrator, session_config, tool_protocol, tool_proxy};

// Re-exporting key items for easier external access.
pub use agentkit::client_wrapper::{ClientWrapper, Message, Role, ToolCall};
pub use agentkit::error::AgentError;
pub use agentkit::orchestrator::Orchestrator;
pub use agentkit::tool_protocol::{ToolDefinition, ToolManager, ToolProvider, ToolResult};
