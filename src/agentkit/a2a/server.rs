//! A2A server.
//!
//! Serves an [`AgentAdapter`] over the A2A wire: one HTTP POST endpoint
//! for every JSON-RPC method, SSE responses for `message/stream` and
//! `tasks/resubscribe`, and the agent card at
//! `GET /.well-known/agent.json`.
//!
//! # Architecture
//!
//! ```text
//! AgentAdapter (your agent logic)
//!        ↓ events via TaskEventSink
//! A2AServer ── TaskStore (status/history/artifacts)
//!        ↓            └─ per-task broadcast pump (tasks/resubscribe)
//! axum Router (POST /, GET /.well-known/agent.json)
//! ```
//!
//! Server invariants: per-task status updates are totally ordered through
//! the store; artifact updates preserve per-artifact append order; for
//! task-shaped responses the task is registered in the store before the
//! adapter runs; the last event of every stream has `final: true` and a
//! terminal state.  `tasks/resubscribe` is live-only: subscribers receive
//! events from subscription time onward, nothing is replayed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use rpc::jsonrpc::{ErrorObject, JsonRpcMessage, RequestId, Response};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::agentkit::a2a::task_store::TaskStore;
use crate::agentkit::a2a::types::{
    methods, A2AMessage, A2ATask, AgentCard, Artifact, MessageSendParams, PushNotificationConfig,
    SendMessageResult, StreamEvent, TaskArtifactUpdateEvent, TaskIdParams,
    TaskPushNotificationConfig, TaskState, TaskStatus, TaskStatusUpdateEvent,
};
use crate::agentkit::client_wrapper::AdapterCapability;
use crate::agentkit::error::AgentError;

/// Capacity of the per-task broadcast pump.
const PUMP_CAPACITY: usize = 64;

/// Shape of the `message/send` response, decided by the adapter per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Message,
    Task,
}

/// Per-request context handed to the adapter.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub task_id: String,
    pub context_id: String,
    /// `true` when the client accepts an `image/*` output mode and the
    /// adapter declares image generation; the adapter should then emit
    /// file artifacts instead of text artifacts.
    pub image_output: bool,
}

/// Delivers task events to registered webhooks.
///
/// Deliveries happen in emission order with a short timeout; a failing
/// webhook is logged and never fails the task itself.
pub struct PushNotifier {
    client: reqwest::Client,
    configs: RwLock<HashMap<String, PushNotificationConfig>>,
}

impl PushNotifier {
    fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
            configs: RwLock::new(HashMap::new()),
        }
    }

    async fn set(&self, task_id: String, config: PushNotificationConfig) {
        self.configs.write().await.insert(task_id, config);
    }

    async fn get(&self, task_id: &str) -> Option<PushNotificationConfig> {
        self.configs.read().await.get(task_id).cloned()
    }

    /// POST the event to the task's webhook, when one is registered.
    async fn deliver(&self, task_id: &str, event: &StreamEvent) {
        let Some(config) = self.get(task_id).await else {
            return;
        };
        let mut request = self.client.post(&config.url).json(event);
        if let Some(token) = &config.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        match request.send().await {
            Ok(response) if !response.status().is_success() => {
                log::warn!(
                    "push delivery for task {} returned {}",
                    task_id,
                    response.status()
                );
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("push delivery for task {} failed: {}", task_id, err);
            }
        }
    }
}

/// Event sink handed to a streaming adapter invocation.
///
/// Every emission mutates the task in the store first, then forwards the
/// event to the live SSE response and to any `tasks/resubscribe` pumps.
pub struct TaskEventSink {
    task_id: String,
    context_id: String,
    store: Arc<TaskStore>,
    live: mpsc::Sender<StreamEvent>,
    pump: broadcast::Sender<StreamEvent>,
    notifier: Arc<PushNotifier>,
}

impl TaskEventSink {
    async fn emit(&self, event: StreamEvent) {
        let _ = self.live.send(event.clone()).await;
        let _ = self.pump.send(event.clone());
        self.notifier.deliver(&self.task_id, &event).await;
    }

    /// Transition to a non-terminal state and emit a status update.
    pub async fn status(&self, state: TaskState) -> Result<(), AgentError> {
        let task = self
            .store
            .update_status(&self.task_id, TaskStatus::now(state))
            .await?;
        self.emit(StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: task.status,
            is_final: false,
        }))
        .await;
        Ok(())
    }

    /// Shorthand for `status(TaskState::Working)`.
    pub async fn working(&self) -> Result<(), AgentError> {
        self.status(TaskState::Working).await
    }

    /// Append an artifact and emit an artifact update.
    pub async fn artifact(&self, artifact: Artifact) -> Result<(), AgentError> {
        self.artifact_update(artifact, false).await
    }

    /// Extend an already-announced artifact (same artifact id).
    pub async fn artifact_append(&self, artifact: Artifact) -> Result<(), AgentError> {
        self.artifact_update(artifact, true).await
    }

    async fn artifact_update(&self, artifact: Artifact, append: bool) -> Result<(), AgentError> {
        self.store
            .append_artifact(&self.task_id, artifact.clone(), append)
            .await?;
        self.emit(StreamEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            artifact,
            append: append.then_some(true),
            last_chunk: None,
        }))
        .await;
        Ok(())
    }

    /// Record an agent message in the history and emit it.
    pub async fn message(&self, mut message: A2AMessage) -> Result<(), AgentError> {
        message.task_id = Some(self.task_id.clone());
        message.context_id = Some(self.context_id.clone());
        self.store
            .append_history(&self.task_id, message.clone())
            .await?;
        self.emit(StreamEvent::Message(message)).await;
        Ok(())
    }

    /// Terminate the task with `completed` and emit the final event.
    pub async fn complete(&self) -> Result<(), AgentError> {
        self.finish(TaskState::Completed, None).await
    }

    /// Terminate the task with `failed` and a short reason.
    pub async fn fail(&self, reason: &str) -> Result<(), AgentError> {
        self.finish(TaskState::Failed, Some(reason.to_string())).await
    }

    async fn finish(&self, state: TaskState, reason: Option<String>) -> Result<(), AgentError> {
        let mut status = TaskStatus::now(state);
        if let Some(reason) = reason {
            let mut message = A2AMessage::agent_text(reason);
            message.task_id = Some(self.task_id.clone());
            status = status.with_message(message);
        }
        let task = self.store.update_status(&self.task_id, status).await?;
        self.emit(StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: task.status,
            is_final: true,
        }))
        .await;
        Ok(())
    }
}

/// The agent logic served over the A2A wire.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Discovery document for `GET /.well-known/agent.json`.
    fn card(&self) -> AgentCard;

    /// Decide the `message/send` response shape for this request.
    fn response_shape(&self, _params: &MessageSendParams) -> ResponseShape {
        ResponseShape::Message
    }

    /// Declared capability set; drives output-modality selection.
    fn capabilities(&self) -> Vec<AdapterCapability> {
        vec![AdapterCapability::Completion]
    }

    /// Answer `message/send`.  `context` is `Some` exactly when
    /// [`response_shape`](Self::response_shape) chose the task shape; the
    /// task is already registered in the store.
    async fn handle_send(
        &self,
        params: MessageSendParams,
        context: Option<RequestContext>,
    ) -> Result<SendMessageResult, AgentError>;

    /// Answer `message/stream` by emitting events through the sink.  The
    /// server emits the final failed status itself when this returns an
    /// error without having terminated the task.
    async fn handle_stream(
        &self,
        params: MessageSendParams,
        context: RequestContext,
        sink: TaskEventSink,
    ) -> Result<(), AgentError>;
}

struct ServerState {
    adapter: Arc<dyn AgentAdapter>,
    store: Arc<TaskStore>,
    pumps: RwLock<HashMap<String, broadcast::Sender<StreamEvent>>>,
    notifier: Arc<PushNotifier>,
}

impl ServerState {
    async fn pump_for(&self, task_id: &str) -> broadcast::Sender<StreamEvent> {
        let mut pumps = self.pumps.write().await;
        pumps
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(PUMP_CAPACITY).0)
            .clone()
    }
}

/// A2A server over an [`AgentAdapter`].
#[derive(Clone)]
pub struct A2AServer {
    inner: Arc<ServerState>,
}

impl A2AServer {
    /// Create a server around an adapter with a fresh task store.
    pub fn new(adapter: Arc<dyn AgentAdapter>) -> Self {
        Self::with_store(adapter, Arc::new(TaskStore::new()))
    }

    /// Create a server sharing an existing task store.
    pub fn with_store(adapter: Arc<dyn AgentAdapter>, store: Arc<TaskStore>) -> Self {
        Self {
            inner: Arc::new(ServerState {
                adapter,
                store,
                pumps: RwLock::new(HashMap::new()),
                notifier: Arc::new(PushNotifier::new()),
            }),
        }
    }

    /// The task store backing this server.
    pub fn store(&self) -> Arc<TaskStore> {
        self.inner.store.clone()
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", post(handle_rpc))
            .route("/.well-known/agent.json", get(handle_agent_card))
            .with_state(self.inner.clone())
    }

    /// Bind and serve.
    pub async fn serve(&self, addr: SocketAddr) -> Result<RunningServer, AgentError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AgentError::Config(format!("bind {}: {}", addr, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        let router = self.router();
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                log::error!("A2A server stopped: {}", err);
            }
        });
        log::info!("A2A server listening on http://{}", addr);
        Ok(RunningServer { addr, handle })
    }
}

/// Handle to a bound A2A server.
pub struct RunningServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl RunningServer {
    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn handle_agent_card(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.adapter.card())
}

async fn handle_rpc(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<serde_json::Value>,
) -> axum::response::Response {
    let request = match JsonRpcMessage::from_value(payload) {
        Ok(JsonRpcMessage::Request(request)) => request,
        Ok(JsonRpcMessage::Notification(_)) => return StatusCode::ACCEPTED.into_response(),
        Ok(JsonRpcMessage::Response(_)) | Err(_) => {
            let response = Response::error(
                None,
                ErrorObject::new(
                    rpc::jsonrpc::error_codes::INVALID_REQUEST,
                    "expected a JSON-RPC request",
                ),
            );
            return json_response(&response);
        }
    };

    let id = request.id.clone();
    match request.method.as_str() {
        methods::MESSAGE_SEND => handle_message_send(state, id, request.params).await,
        methods::MESSAGE_STREAM => handle_message_stream(state, id, request.params).await,
        methods::TASKS_GET => handle_tasks_get(state, id, request.params).await,
        methods::TASKS_CANCEL => handle_tasks_cancel(state, id, request.params).await,
        methods::TASKS_RESUBSCRIBE => handle_tasks_resubscribe(state, id, request.params).await,
        methods::TASKS_PUSH_CONFIG_SET => handle_push_config_set(state, id, request.params).await,
        methods::TASKS_PUSH_CONFIG_GET => handle_push_config_get(state, id, request.params).await,
        other => json_response(&Response::error(
            Some(id),
            ErrorObject::method_not_found(other),
        )),
    }
}

fn json_response(response: &Response) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::to_value(response).expect("response envelopes always serialize")),
    )
        .into_response()
}

fn decode_params<T: serde::de::DeserializeOwned>(
    id: &RequestId,
    params: Option<serde_json::Value>,
) -> Result<T, axum::response::Response> {
    let params = params.ok_or_else(|| {
        json_response(&Response::error(
            Some(id.clone()),
            ErrorObject::invalid_params("missing params"),
        ))
    })?;
    serde_json::from_value(params).map_err(|e| {
        json_response(&Response::error(
            Some(id.clone()),
            ErrorObject::invalid_params(e.to_string()),
        ))
    })
}

fn image_output_requested(params: &MessageSendParams, adapter: &Arc<dyn AgentAdapter>) -> bool {
    let wants_image = params
        .configuration
        .as_ref()
        .and_then(|c| c.accepted_output_modes.as_ref())
        .map(|modes| modes.iter().any(|m| m.starts_with("image/")))
        .unwrap_or(false);
    wants_image
        && adapter
            .capabilities()
            .contains(&AdapterCapability::ImageGeneration)
}

/// Register a task for an incoming message, recording it in the store
/// before anything is dispatched to the adapter.
async fn register_task(
    state: &Arc<ServerState>,
    params: &MessageSendParams,
) -> Result<RequestContext, AgentError> {
    let task_id = params
        .message
        .task_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let context_id = params
        .message
        .context_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    state
        .store
        .add(A2ATask::submitted(task_id.clone(), context_id.clone()))
        .await?;
    let mut incoming = params.message.clone();
    incoming.task_id = Some(task_id.clone());
    incoming.context_id = Some(context_id.clone());
    state.store.append_history(&task_id, incoming).await?;

    Ok(RequestContext {
        task_id,
        context_id,
        image_output: image_output_requested(params, &state.adapter),
    })
}

async fn handle_message_send(
    state: Arc<ServerState>,
    id: RequestId,
    params: Option<serde_json::Value>,
) -> axum::response::Response {
    let params: MessageSendParams = match decode_params(&id, params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    if let Err(reason) = params.message.validate() {
        return json_response(&Response::error(
            Some(id),
            ErrorObject::invalid_params(reason),
        ));
    }

    let context = match state.adapter.response_shape(&params) {
        ResponseShape::Task => match register_task(&state, &params).await {
            Ok(context) => Some(context),
            Err(err) => {
                return json_response(&Response::error(
                    Some(id),
                    ErrorObject::internal(err.to_string()),
                ))
            }
        },
        ResponseShape::Message => None,
    };

    match state.adapter.handle_send(params, context).await {
        Ok(result) => match serde_json::to_value(&result) {
            Ok(value) => json_response(&Response::success(id, value)),
            Err(err) => json_response(&Response::error(
                Some(id),
                ErrorObject::internal(err.to_string()),
            )),
        },
        Err(err) => json_response(&Response::error(
            Some(id),
            ErrorObject::internal(err.to_string()),
        )),
    }
}

async fn handle_message_stream(
    state: Arc<ServerState>,
    id: RequestId,
    params: Option<serde_json::Value>,
) -> axum::response::Response {
    let params: MessageSendParams = match decode_params(&id, params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    if let Err(reason) = params.message.validate() {
        return json_response(&Response::error(
            Some(id),
            ErrorObject::invalid_params(reason),
        ));
    }

    let context = match register_task(&state, &params).await {
        Ok(context) => context,
        Err(err) => {
            return json_response(&Response::error(
                Some(id),
                ErrorObject::internal(err.to_string()),
            ))
        }
    };

    let (tx, rx) = mpsc::channel::<StreamEvent>(PUMP_CAPACITY);
    let sink = TaskEventSink {
        task_id: context.task_id.clone(),
        context_id: context.context_id.clone(),
        store: state.store.clone(),
        live: tx,
        pump: state.pump_for(&context.task_id).await,
        notifier: state.notifier.clone(),
    };

    let adapter = state.adapter.clone();
    tokio::spawn(async move {
        let task_id = context.task_id.clone();
        if let Err(err) = adapter.handle_stream(params, context, sink.clone_for_recovery()).await {
            log::warn!("stream adapter failed for task {}: {}", task_id, err);
            // Terminate the task unless the adapter already did.
            let _ = sink.fail(&err.to_string()).await;
        }
        // Dropping the sink closes the live channel and ends the SSE body.
    });

    let stream = ReceiverStream::new(rx).map(move |event| {
        let envelope = Response::success(
            id.clone(),
            serde_json::to_value(&event).expect("stream events always serialize"),
        );
        Ok::<_, std::convert::Infallible>(
            Event::default().data(
                serde_json::to_string(&envelope).expect("response envelopes always serialize"),
            ),
        )
    });
    Sse::new(stream).into_response()
}

impl TaskEventSink {
    /// Clone used so the server can emit a final failure if the adapter
    /// errors out without terminating the task itself.
    fn clone_for_recovery(&self) -> TaskEventSink {
        TaskEventSink {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            store: self.store.clone(),
            live: self.live.clone(),
            pump: self.pump.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

async fn handle_push_config_set(
    state: Arc<ServerState>,
    id: RequestId,
    params: Option<serde_json::Value>,
) -> axum::response::Response {
    let params: TaskPushNotificationConfig = match decode_params(&id, params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    if state.store.get(&params.task_id).await.is_none() {
        return json_response(&Response::error(
            Some(id),
            ErrorObject::new(
                rpc::jsonrpc::error_codes::APPLICATION_ERROR_MAX,
                format!("unknown task {}", params.task_id),
            ),
        ));
    }
    state
        .notifier
        .set(params.task_id.clone(), params.push_notification_config.clone())
        .await;
    json_response(&Response::success(
        id,
        serde_json::to_value(&params).expect("push configs always serialize"),
    ))
}

async fn handle_push_config_get(
    state: Arc<ServerState>,
    id: RequestId,
    params: Option<serde_json::Value>,
) -> axum::response::Response {
    let params: TaskIdParams = match decode_params(&id, params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    match state.notifier.get(&params.id).await {
        Some(config) => {
            let result = TaskPushNotificationConfig {
                task_id: params.id,
                push_notification_config: config,
            };
            json_response(&Response::success(
                id,
                serde_json::to_value(&result).expect("push configs always serialize"),
            ))
        }
        None => json_response(&Response::error(
            Some(id),
            ErrorObject::new(
                rpc::jsonrpc::error_codes::APPLICATION_ERROR_MAX,
                format!("no push config for task {}", params.id),
            ),
        )),
    }
}

async fn handle_tasks_get(
    state: Arc<ServerState>,
    id: RequestId,
    params: Option<serde_json::Value>,
) -> axum::response::Response {
    let params: TaskIdParams = match decode_params(&id, params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    match state.store.get(&params.id).await {
        Some(task) => json_response(&Response::success(
            id,
            serde_json::to_value(&task).expect("tasks always serialize"),
        )),
        None => json_response(&Response::error(
            Some(id),
            ErrorObject::new(
                rpc::jsonrpc::error_codes::APPLICATION_ERROR_MAX,
                format!("unknown task {}", params.id),
            ),
        )),
    }
}

async fn handle_tasks_cancel(
    state: Arc<ServerState>,
    id: RequestId,
    params: Option<serde_json::Value>,
) -> axum::response::Response {
    let params: TaskIdParams = match decode_params(&id, params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let Some(task) = state.store.get(&params.id).await else {
        return json_response(&Response::error(
            Some(id),
            ErrorObject::new(
                rpc::jsonrpc::error_codes::APPLICATION_ERROR_MAX,
                format!("unknown task {}", params.id),
            ),
        ));
    };

    // Cancelling a terminal task returns it unchanged.
    if task.status.state.is_terminal() {
        return json_response(&Response::success(
            id,
            serde_json::to_value(&task).expect("tasks always serialize"),
        ));
    }

    match state
        .store
        .update_status(&params.id, TaskStatus::now(TaskState::Canceled))
        .await
    {
        Ok(task) => {
            let event = StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
                task_id: task.id.clone(),
                context_id: task.context_id.clone(),
                status: task.status.clone(),
                is_final: true,
            });
            let pump = state.pump_for(&params.id).await;
            let _ = pump.send(event.clone());
            state.notifier.deliver(&task.id, &event).await;
            json_response(&Response::success(
                id,
                serde_json::to_value(&task).expect("tasks always serialize"),
            ))
        }
        Err(err) => json_response(&Response::error(
            Some(id),
            ErrorObject::internal(err.to_string()),
        )),
    }
}

async fn handle_tasks_resubscribe(
    state: Arc<ServerState>,
    id: RequestId,
    params: Option<serde_json::Value>,
) -> axum::response::Response {
    let params: TaskIdParams = match decode_params(&id, params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let Some(task) = state.store.get(&params.id).await else {
        return json_response(&Response::error(
            Some(id),
            ErrorObject::new(
                rpc::jsonrpc::error_codes::APPLICATION_ERROR_MAX,
                format!("unknown task {}", params.id),
            ),
        ));
    };

    // A terminal task yields exactly one final status event.
    if task.status.state.is_terminal() {
        let event = StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            status: task.status.clone(),
            is_final: true,
        });
        let envelope = Response::success(
            id,
            serde_json::to_value(&event).expect("stream events always serialize"),
        );
        let stream = futures_util::stream::once(async move {
            Ok::<_, std::convert::Infallible>(Event::default().data(
                serde_json::to_string(&envelope).expect("response envelopes always serialize"),
            ))
        });
        return Sse::new(stream).into_response();
    }

    // Live-only: events from subscription time onward, no replay.
    let receiver = state.pump_for(&params.id).await.subscribe();
    let stream = async_stream::stream! {
        let mut receiver = receiver;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let is_final = event.is_final();
                    let envelope = Response::success(
                        id.clone(),
                        serde_json::to_value(&event).expect("stream events always serialize"),
                    );
                    yield Ok::<_, std::convert::Infallible>(Event::default().data(
                        serde_json::to_string(&envelope)
                            .expect("response envelopes always serialize"),
                    ));
                    if is_final {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("resubscribe stream lagged by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentkit::a2a::types::MessageRole;

    struct EchoAdapter;

    #[async_trait]
    impl AgentAdapter for EchoAdapter {
        fn card(&self) -> AgentCard {
            AgentCard {
                name: "echo-agent".to_string(),
                description: "Echoes messages".to_string(),
                version: "0.1.0".to_string(),
                capabilities: Default::default(),
                skills: Vec::new(),
                default_input_modes: vec!["text/plain".to_string()],
                default_output_modes: vec!["text/plain".to_string()],
            }
        }

        async fn handle_send(
            &self,
            params: MessageSendParams,
            _context: Option<RequestContext>,
        ) -> Result<SendMessageResult, AgentError> {
            Ok(SendMessageResult::Message(A2AMessage {
                role: MessageRole::Agent,
                parts: vec![crate::agentkit::a2a::types::Part::text(format!(
                    "{} back",
                    params.message.text()
                ))],
                message_id: Uuid::new_v4().to_string(),
                task_id: None,
                context_id: None,
            }))
        }

        async fn handle_stream(
            &self,
            params: MessageSendParams,
            _context: RequestContext,
            sink: TaskEventSink,
        ) -> Result<(), AgentError> {
            sink.working().await?;
            sink.artifact(Artifact::text(format!("{} back", params.message.text())))
                .await?;
            sink.complete().await?;
            Ok(())
        }
    }

    #[test]
    fn test_image_output_selection() {
        struct ImageAdapter;
        #[async_trait]
        impl AgentAdapter for ImageAdapter {
            fn card(&self) -> AgentCard {
                EchoAdapter.card()
            }
            fn capabilities(&self) -> Vec<AdapterCapability> {
                vec![AdapterCapability::Completion, AdapterCapability::ImageGeneration]
            }
            async fn handle_send(
                &self,
                _params: MessageSendParams,
                _context: Option<RequestContext>,
            ) -> Result<SendMessageResult, AgentError> {
                unimplemented!()
            }
            async fn handle_stream(
                &self,
                _params: MessageSendParams,
                _context: RequestContext,
                _sink: TaskEventSink,
            ) -> Result<(), AgentError> {
                unimplemented!()
            }
        }

        let params = |modes: Vec<&str>| MessageSendParams {
            message: A2AMessage::user_text("draw"),
            configuration: Some(crate::agentkit::a2a::types::MessageSendConfiguration {
                accepted_output_modes: Some(modes.into_iter().map(String::from).collect()),
                blocking: None,
            }),
        };

        let image_adapter: Arc<dyn AgentAdapter> = Arc::new(ImageAdapter);
        let text_adapter: Arc<dyn AgentAdapter> = Arc::new(EchoAdapter);

        assert!(image_output_requested(&params(vec!["image/png"]), &image_adapter));
        assert!(!image_output_requested(&params(vec!["text/plain"]), &image_adapter));
        // Adapter without the capability never selects image output.
        assert!(!image_output_requested(&params(vec!["image/png"]), &text_adapter));
    }

    #[tokio::test]
    async fn test_register_task_records_before_dispatch() {
        let server = A2AServer::new(Arc::new(EchoAdapter));
        let params = MessageSendParams {
            message: A2AMessage::user_text("Hi"),
            configuration: None,
        };
        let context = register_task(&server.inner, &params).await.unwrap();

        let task = server.store().get(&context.task_id).await.unwrap();
        assert_eq!(task.status.state, TaskState::Submitted);
        assert_eq!(task.history.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_event_order_and_store_sync() {
        let server = A2AServer::new(Arc::new(EchoAdapter));
        let params = MessageSendParams {
            message: A2AMessage::user_text("Hi"),
            configuration: None,
        };
        let context = register_task(&server.inner, &params).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let sink = TaskEventSink {
            task_id: context.task_id.clone(),
            context_id: context.context_id.clone(),
            store: server.store(),
            live: tx,
            pump: server.inner.pump_for(&context.task_id).await,
            notifier: server.inner.notifier.clone(),
        };

        EchoAdapter
            .handle_stream(params, context.clone(), sink)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            StreamEvent::StatusUpdate(u) if u.status.state == TaskState::Working && !u.is_final
        ));
        assert!(matches!(&events[1], StreamEvent::ArtifactUpdate(_)));
        assert!(matches!(
            &events[2],
            StreamEvent::StatusUpdate(u) if u.status.state == TaskState::Completed && u.is_final
        ));

        let task = server.store().get(&context.task_id).await.unwrap();
        assert_eq!(task.status.state, TaskState::Completed);
        assert_eq!(task.artifacts.unwrap().len(), 1);
    }
}
