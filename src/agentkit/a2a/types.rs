//! A2A wire vocabulary.
//!
//! Messages, tasks, artifacts, streaming events, and the agent card.
//! Containers carry a `kind` discriminator so `message/send` responses and
//! stream events can be told apart; field names follow the protocol's
//! camelCase convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Method names used on the wire.
pub mod methods {
    pub const MESSAGE_SEND: &str = "message/send";
    pub const MESSAGE_STREAM: &str = "message/stream";
    pub const TASKS_GET: &str = "tasks/get";
    pub const TASKS_CANCEL: &str = "tasks/cancel";
    pub const TASKS_RESUBSCRIBE: &str = "tasks/resubscribe";
    pub const TASKS_PUSH_CONFIG_SET: &str = "tasks/pushNotificationConfig/set";
    pub const TASKS_PUSH_CONFIG_GET: &str = "tasks/pushNotificationConfig/get";
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "submitted")]
    Submitted,
    #[serde(rename = "working")]
    Working,
    #[serde(rename = "input-required")]
    InputRequired,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "auth-required")]
    AuthRequired,
}

impl TaskState {
    /// Whether no further transitions are allowed from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed | TaskState::Rejected
        )
    }
}

/// Who authored an A2A message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// One part of a message or artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text {
        text: String,
    },
    Data {
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bytes: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl Part {
    /// A text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// A structured data part.
    pub fn data(data: Value) -> Self {
        Part::Data { data }
    }

    /// A file part carrying inline base64 bytes.
    pub fn file_from_bytes(bytes: impl Into<String>, mime_type: Option<String>) -> Self {
        Part::File {
            bytes: Some(bytes.into()),
            url: None,
            mime_type,
        }
    }

    /// A file part referencing an external URL.
    pub fn file_from_url(url: impl Into<String>, mime_type: Option<String>) -> Self {
        Part::File {
            bytes: None,
            url: Some(url.into()),
            mime_type,
        }
    }

    /// File parts must carry exactly one of `bytes` / `url`.
    pub fn validate(&self) -> Result<(), String> {
        if let Part::File { bytes, url, .. } = self {
            match (bytes, url) {
                (Some(_), None) | (None, Some(_)) => Ok(()),
                (Some(_), Some(_)) => {
                    Err("file part carries both bytes and url".to_string())
                }
                (None, None) => Err("file part carries neither bytes nor url".to_string()),
            }
        } else {
            Ok(())
        }
    }

    /// The textual payload, if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message exchanged between peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct A2AMessage {
    pub role: MessageRole,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl A2AMessage {
    /// A user message with a single text part and a fresh message id.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![Part::text(text)],
            message_id: Uuid::new_v4().to_string(),
            task_id: None,
            context_id: None,
        }
    }

    /// An agent message with a single text part and a fresh message id.
    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            parts: vec![Part::text(text)],
            message_id: Uuid::new_v4().to_string(),
            task_id: None,
            context_id: None,
        }
    }

    /// Concatenated text of every text part.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Validate every part (file parts: exactly one of bytes/url).
    pub fn validate(&self) -> Result<(), String> {
        for part in &self.parts {
            part.validate()?;
        }
        Ok(())
    }
}

/// Status of a task at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<A2AMessage>,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    /// A status stamped with the current time.
    pub fn now(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a status message.
    pub fn with_message(mut self, message: A2AMessage) -> Self {
        self.message = Some(message);
        self
    }
}

/// A produced output attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub artifact_id: String,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Artifact {
    /// A single-text-part artifact with a fresh id.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            artifact_id: Uuid::new_v4().to_string(),
            parts: vec![Part::text(text)],
            metadata: None,
        }
    }

    /// A single-file-part artifact with a fresh id.
    pub fn file(bytes: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            artifact_id: Uuid::new_v4().to_string(),
            parts: vec![Part::file_from_bytes(bytes, Some(mime_type.into()))],
            metadata: None,
        }
    }
}

/// A long-running exchange with status, history, and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct A2ATask {
    pub id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<A2AMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
}

impl A2ATask {
    /// A freshly submitted task.
    pub fn submitted(id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context_id: context_id.into(),
            status: TaskStatus::now(TaskState::Submitted),
            history: None,
            artifacts: None,
        }
    }
}

/// `message/send` and `message/stream` configuration block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_output_modes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
}

/// Parameters of `message/send` and `message/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    pub message: A2AMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<MessageSendConfiguration>,
}

/// Parameters of `tasks/get`, `tasks/cancel`, `tasks/resubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdParams {
    pub id: String,
}

/// Result of `message/send`: the adapter decides the shape per request and
/// clients accept both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SendMessageResult {
    Task(A2ATask),
    Message(A2AMessage),
}

/// Status change event on a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// Artifact event on a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub artifact: Artifact,
    /// `true` when the parts extend an artifact already announced under
    /// the same artifact id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chunk: Option<bool>,
}

/// One event on a `message/stream` / `tasks/resubscribe` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum StreamEvent {
    #[serde(rename = "status-update")]
    StatusUpdate(TaskStatusUpdateEvent),
    #[serde(rename = "artifact-update")]
    ArtifactUpdate(TaskArtifactUpdateEvent),
    #[serde(rename = "message")]
    Message(A2AMessage),
}

impl StreamEvent {
    /// Whether this event closes the stream.
    pub fn is_final(&self) -> bool {
        matches!(self, StreamEvent::StatusUpdate(update) if update.is_final)
    }
}

/// Webhook target for out-of-band task updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushNotificationConfig {
    /// URL events are POSTed to.
    pub url: String,
    /// Optional bearer token attached to deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Parameters and result of `tasks/pushNotificationConfig/set` / `get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPushNotificationConfig {
    pub task_id: String,
    pub push_notification_config: PushNotificationConfig,
}

/// One advertised skill on the agent card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Capability flags on the agent card.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_transition_history: bool,
}

/// Discovery document served at `GET /.well-known/agent.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    #[serde(default)]
    pub default_output_modes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_state_terminal_set() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Rejected.is_terminal());
        assert!(!TaskState::Submitted.is_terminal());
        assert!(!TaskState::Working.is_terminal());
        assert!(!TaskState::InputRequired.is_terminal());
        assert!(!TaskState::AuthRequired.is_terminal());
    }

    #[test]
    fn test_task_state_wire_names() {
        assert_eq!(
            serde_json::to_value(TaskState::InputRequired).unwrap(),
            json!("input-required")
        );
        assert_eq!(
            serde_json::to_value(TaskState::AuthRequired).unwrap(),
            json!("auth-required")
        );
    }

    #[test]
    fn test_file_part_validation() {
        assert!(Part::file_from_bytes("QUFB", None).validate().is_ok());
        assert!(Part::file_from_url("https://x/y.png", None).validate().is_ok());

        let both = Part::File {
            bytes: Some("QUFB".to_string()),
            url: Some("https://x".to_string()),
            mime_type: None,
        };
        assert!(both.validate().is_err());

        let neither = Part::File {
            bytes: None,
            url: None,
            mime_type: None,
        };
        assert!(neither.validate().is_err());
    }

    #[test]
    fn test_message_round_trip() {
        let message = A2AMessage {
            role: MessageRole::User,
            parts: vec![Part::text("Hi"), Part::data(json!({"n": 1, "b": true}))],
            message_id: "m-1".to_string(),
            task_id: Some("t-1".to_string()),
            context_id: None,
        };
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["messageId"], "m-1");
        assert_eq!(encoded["taskId"], "t-1");
        assert_eq!(encoded["parts"][0]["type"], "text");

        let decoded: A2AMessage = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, message);
        assert!(decoded.parts[1]
            .validate()
            .is_ok());
    }

    #[test]
    fn test_task_round_trip() {
        let task = A2ATask {
            id: "task-1".to_string(),
            context_id: "ctx-1".to_string(),
            status: TaskStatus::now(TaskState::Working),
            history: Some(vec![A2AMessage::user_text("Hi")]),
            artifacts: Some(vec![Artifact::text("Hi back")]),
        };
        let encoded = serde_json::to_string(&task).unwrap();
        let decoded: A2ATask = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_send_result_discriminates_by_kind() {
        let task = serde_json::to_value(SendMessageResult::Task(A2ATask::submitted(
            "t", "c",
        )))
        .unwrap();
        assert_eq!(task["kind"], "task");

        let message =
            serde_json::to_value(SendMessageResult::Message(A2AMessage::agent_text("ok"))).unwrap();
        assert_eq!(message["kind"], "message");

        match serde_json::from_value::<SendMessageResult>(task).unwrap() {
            SendMessageResult::Task(t) => assert_eq!(t.id, "t"),
            other => panic!("expected task, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_event_final_flag() {
        let update = StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: "t".to_string(),
            context_id: "c".to_string(),
            status: TaskStatus::now(TaskState::Completed),
            is_final: true,
        });
        assert!(update.is_final());

        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["kind"], "status-update");
        assert_eq!(value["final"], true);

        let artifact = StreamEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: "t".to_string(),
            context_id: "c".to_string(),
            artifact: Artifact::text("x"),
            append: None,
            last_chunk: None,
        });
        assert!(!artifact.is_final());
    }

    #[test]
    fn test_agent_card_wire_shape() {
        let card = AgentCard {
            name: "echo-agent".to_string(),
            description: "Echoes messages".to_string(),
            version: "0.1.0".to_string(),
            capabilities: AgentCapabilities {
                streaming: true,
                push_notifications: false,
                state_transition_history: false,
            },
            skills: vec![AgentSkill {
                id: "echo".to_string(),
                name: "Echo".to_string(),
                description: "Echo a message back".to_string(),
                tags: vec!["text".to_string()],
            }],
            default_input_modes: vec!["text/plain".to_string()],
            default_output_modes: vec!["text/plain".to_string()],
        };
        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["capabilities"]["pushNotifications"], false);
        assert_eq!(value["defaultInputModes"][0], "text/plain");
    }
}
