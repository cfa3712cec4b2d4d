//! A2A client.
//!
//! JSON-RPC over HTTP against a peer agent's single endpoint: send and
//! stream messages, fetch and cancel tasks, resubscribe to task events,
//! and fetch the agent card from `/.well-known/agent.json`.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentkit::a2a::client::A2AClient;
//! use agentkit::a2a::types::{A2AMessage, MessageSendParams};
//! use futures_util::StreamExt;
//!
//! # async fn demo() -> Result<(), agentkit::AgentError> {
//! let client = A2AClient::new("http://localhost:4310");
//! let card = client.agent_card().await?;
//! println!("talking to {}", card.name);
//!
//! let mut events = client
//!     .stream_message(MessageSendParams {
//!         message: A2AMessage::user_text("Hi"),
//!         configuration: None,
//!     })
//!     .await?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::Stream;
use futures_util::StreamExt;
use rpc::jsonrpc::{IdAllocator, JsonRpcMessage, Request};
use rpc::sse::SseParser;
use rpc::transport::TransportError;
use serde_json::Value;

use crate::agentkit::a2a::types::{
    methods, A2ATask, AgentCard, MessageSendParams, SendMessageResult, StreamEvent, TaskIdParams,
    TaskPushNotificationConfig,
};
use crate::agentkit::auth::AuthProvider;
use crate::agentkit::error::{AgentError, TimeoutError};

/// A stream of task events from `message/stream` or `tasks/resubscribe`.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AgentError>> + Send>>;

/// Client for one remote A2A agent.
pub struct A2AClient {
    base_url: String,
    http: reqwest::Client,
    auth: Option<Arc<dyn AuthProvider>>,
    ids: IdAllocator,
    request_timeout: Duration,
    sse_idle_timeout: Duration,
}

impl A2AClient {
    /// Create a client for the agent at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .tcp_keepalive(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            auth: None,
            ids: IdAllocator::new(),
            request_timeout: Duration::from_secs(60),
            sse_idle_timeout: Duration::from_secs(600),
        }
    }

    /// Attach an auth provider consulted before every request.
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Override the non-streaming request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the SSE idle timeout.
    pub fn with_sse_idle_timeout(mut self, timeout: Duration) -> Self {
        self.sse_idle_timeout = timeout;
        self
    }

    /// The endpoint this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the discovery document.
    pub async fn agent_card(&self) -> Result<AgentCard, AgentError> {
        let url = format!("{}/.well-known/agent.json", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::HttpStatus {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            }
            .into());
        }
        response
            .json::<AgentCard>()
            .await
            .map_err(|e| AgentError::Protocol(format!("bad agent card: {}", e)))
    }

    /// `message/send`: the adapter on the other side decides whether a
    /// `Message` or a `Task` comes back; both are accepted.
    pub async fn send_message(
        &self,
        params: MessageSendParams,
    ) -> Result<SendMessageResult, AgentError> {
        let result = self
            .call(methods::MESSAGE_SEND, serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `tasks/get`.
    pub async fn get_task(&self, task_id: &str) -> Result<A2ATask, AgentError> {
        let params = TaskIdParams {
            id: task_id.to_string(),
        };
        let result = self
            .call(methods::TASKS_GET, serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `tasks/cancel`.  Cancelling a terminal task returns it unchanged.
    pub async fn cancel_task(&self, task_id: &str) -> Result<A2ATask, AgentError> {
        let params = TaskIdParams {
            id: task_id.to_string(),
        };
        let result = self
            .call(methods::TASKS_CANCEL, serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `tasks/pushNotificationConfig/set`: register a webhook for a task.
    pub async fn set_push_notification_config(
        &self,
        config: TaskPushNotificationConfig,
    ) -> Result<TaskPushNotificationConfig, AgentError> {
        let result = self
            .call(
                methods::TASKS_PUSH_CONFIG_SET,
                serde_json::to_value(&config)?,
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `tasks/pushNotificationConfig/get`.
    pub async fn get_push_notification_config(
        &self,
        task_id: &str,
    ) -> Result<TaskPushNotificationConfig, AgentError> {
        let params = TaskIdParams {
            id: task_id.to_string(),
        };
        let result = self
            .call(
                methods::TASKS_PUSH_CONFIG_GET,
                serde_json::to_value(&params)?,
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `message/stream`: events until one arrives with `final: true`.
    pub async fn stream_message(&self, params: MessageSendParams) -> Result<EventStream, AgentError> {
        self.open_stream(methods::MESSAGE_STREAM, serde_json::to_value(&params)?)
            .await
    }

    /// `tasks/resubscribe`: live events from subscription time onward.
    pub async fn resubscribe(&self, task_id: &str) -> Result<EventStream, AgentError> {
        let params = TaskIdParams {
            id: task_id.to_string(),
        };
        self.open_stream(methods::TASKS_RESUBSCRIBE, serde_json::to_value(&params)?)
            .await
    }

    async fn request_builder(&self, body: &Request) -> Result<reqwest::RequestBuilder, AgentError> {
        let mut builder = self
            .http
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body.to_bytes());
        if let Some(auth) = &self.auth {
            for (name, value) in auth.headers().await? {
                builder = builder.header(name, value);
            }
        }
        Ok(builder)
    }

    async fn dispatch(&self, body: &Request) -> Result<reqwest::Response, AgentError> {
        let response = self
            .request_builder(body)
            .await?
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        if response.status().as_u16() == 401 {
            if let Some(auth) = &self.auth {
                auth.refresh().await?;
                let retried = self
                    .request_builder(body)
                    .await?
                    .send()
                    .await
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                if retried.status().as_u16() != 401 {
                    return Ok(retried);
                }
            }
            return Err(crate::agentkit::error::AuthError::Expired.into());
        }
        Ok(response)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        let request = Request::new(self.ids.next(), method, Some(params));
        let send = self.dispatch(&request);
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| TimeoutError::Request(self.request_timeout))??;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }
            .into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        match JsonRpcMessage::from_slice(&body)? {
            JsonRpcMessage::Response(envelope) => envelope.into_result().map_err(|error| {
                AgentError::Protocol(format!("agent error {}: {}", error.code, error.message))
            }),
            _ => Err(AgentError::Protocol(
                "expected a JSON-RPC response".to_string(),
            )),
        }
    }

    async fn open_stream(&self, method: &str, params: Value) -> Result<EventStream, AgentError> {
        let request = Request::new(self.ids.next(), method, Some(params));
        let response = self.dispatch(&request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }
            .into());
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.starts_with("text/event-stream") {
            return Err(AgentError::Protocol(format!(
                "expected text/event-stream, got {:?}",
                content_type
            )));
        }

        let idle_timeout = self.sse_idle_timeout;
        let stream = async_stream::stream! {
            let mut parser = SseParser::new();
            let mut body = response.bytes_stream();
            'outer: loop {
                let chunk = match tokio::time::timeout(idle_timeout, body.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(err))) => {
                        yield Err(TransportError::SseParse(err.to_string()).into());
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(TimeoutError::IdleStream(idle_timeout).into());
                        break;
                    }
                };
                for sse_event in parser.feed(&chunk) {
                    if sse_event.data.is_empty() {
                        continue;
                    }
                    match decode_stream_event(sse_event.data.as_bytes()) {
                        Ok(event) => {
                            let is_final = event.is_final();
                            yield Ok(event);
                            if is_final {
                                break 'outer;
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            break 'outer;
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Each SSE `data:` line carries a JSON-RPC response envelope whose
/// `result` is the stream event.
fn decode_stream_event(data: &[u8]) -> Result<StreamEvent, AgentError> {
    match JsonRpcMessage::from_slice(data)? {
        JsonRpcMessage::Response(envelope) => {
            let result = envelope.into_result().map_err(|error| {
                AgentError::Protocol(format!("agent error {}: {}", error.code, error.message))
            })?;
            Ok(serde_json::from_value(result)?)
        }
        _ => Err(AgentError::Protocol(
            "stream frame was not a response envelope".to_string(),
        )),
    }
}
