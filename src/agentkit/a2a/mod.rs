//! Agent-to-Agent (A2A) runtime.
//!
//! Peer agents exchange messages and long-running tasks over JSON-RPC 2.0:
//! a single HTTP POST endpoint for every method, SSE responses for the
//! streaming ones, and an agent card published at
//! `GET /.well-known/agent.json` for discovery.

pub mod client;
pub mod server;
pub mod task_store;
pub mod types;

pub use client::A2AClient;
pub use server::{A2AServer, AgentAdapter, RequestContext, ResponseShape, TaskEventSink};
pub use task_store::TaskStore;
pub use types::{A2AMessage, A2ATask, AgentCard, Artifact, Part, TaskState, TaskStatus};
