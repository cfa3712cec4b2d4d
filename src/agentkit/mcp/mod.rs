//! Model Context Protocol runtime.
//!
//! Client and server speak MCP JSON-RPC over any [`rpc::Transport`]: a
//! spawned stdio process, an in-process pipe, or Streamable HTTP.  The
//! [`http_adapter`] module additionally exposes a server over axum for
//! remote clients.

pub mod client;
pub mod http_adapter;
pub mod server;
pub mod types;

pub use client::{ConnectionState, McpClient};
pub use server::{McpServer, ToolHandler};
pub use types::{Content, McpTool};
