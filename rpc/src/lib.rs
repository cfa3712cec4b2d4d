//! JSON-RPC 2.0 codec and transport primitives for AgentKit.
//!
//! This crate is the wire-level foundation shared by the MCP and A2A
//! runtimes.  It deliberately knows nothing about either protocol's
//! vocabulary: it encodes and decodes JSON-RPC envelopes and moves framed
//! JSON messages across byte-stream transports.
//!
//! # Architecture
//!
//! ```text
//! MCP/A2A client or server
//!         ↓
//! JsonRpcMessage (codec)
//!         ↓
//! Transport (trait)
//!    ┌────┴─────────┬──────────────┐
//!    ↓              ↓              ↓
//! StdioTransport  StreamableHttp  PipeTransport
//! (child process) (POST + SSE)    (in-process)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use rpc::jsonrpc::{IdAllocator, Request};
//! use rpc::pipe::PipeTransport;
//! use rpc::transport::Transport;
//!
//! # async {
//! let (mut client_side, mut _server_side) = PipeTransport::pair();
//! let mut inbound = client_side.start().await.unwrap();
//!
//! let ids = IdAllocator::new();
//! let request = Request::new(ids.next(), "tools/list", None);
//! client_side.send(&request.to_bytes()).await.unwrap();
//! # };
//! ```

pub mod http;
pub mod jsonrpc;
pub mod pipe;
pub mod sse;
pub mod stdio;
pub mod transport;

pub use jsonrpc::{ErrorObject, IdAllocator, JsonRpcMessage, Notification, Request, RequestId, Response};
pub use transport::{MessageFilter, Transport, TransportError};
