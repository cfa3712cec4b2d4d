//! In-memory task store.
//!
//! The only cross-component shared state in the toolkit.  Mutations are
//! serialized through the store lock, every mutation stamps a timestamp,
//! and terminal tasks reject all further changes.  Tasks live for the
//! process lifetime; there is no eviction.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::agentkit::a2a::types::{A2AMessage, A2ATask, Artifact, TaskState, TaskStatus};
use crate::agentkit::error::AgentError;

/// Map of task id to task, append-only per task.
pub struct TaskStore {
    tasks: RwLock<HashMap<String, A2ATask>>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new task.  Replacing an existing id is a protocol error.
    pub async fn add(&self, task: A2ATask) -> Result<(), AgentError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(AgentError::Protocol(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Fetch a task by id.
    pub async fn get(&self, id: &str) -> Option<A2ATask> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the store holds no tasks.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Transition a task to a new status.
    ///
    /// Rejected with the task unchanged when the task is already in a
    /// terminal state.  The status timestamp is re-stamped at mutation
    /// time so updates are totally ordered per task.
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<A2ATask, AgentError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| AgentError::Protocol(format!("unknown task {}", id)))?;
        if task.status.state.is_terminal() {
            return Err(AgentError::Protocol(format!(
                "task {} is terminal; status update rejected",
                id
            )));
        }
        let mut status = status;
        status.timestamp = Utc::now();
        task.status = status;
        Ok(task.clone())
    }

    /// Append an artifact.
    ///
    /// When `append` is set and an artifact with the same id exists, the
    /// new parts extend it in order; otherwise the artifact is added as a
    /// new entry.  Artifacts are append-only: nothing is ever replaced or
    /// removed.
    pub async fn append_artifact(
        &self,
        id: &str,
        artifact: Artifact,
        append: bool,
    ) -> Result<A2ATask, AgentError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| AgentError::Protocol(format!("unknown task {}", id)))?;
        if task.status.state.is_terminal() {
            return Err(AgentError::Protocol(format!(
                "task {} is terminal; artifact update rejected",
                id
            )));
        }

        let artifacts = task.artifacts.get_or_insert_with(Vec::new);
        if append {
            if let Some(existing) = artifacts
                .iter_mut()
                .find(|a| a.artifact_id == artifact.artifact_id)
            {
                existing.parts.extend(artifact.parts);
                task.status.timestamp = Utc::now();
                return Ok(task.clone());
            }
        }
        artifacts.push(artifact);
        task.status.timestamp = Utc::now();
        Ok(task.clone())
    }

    /// Append a message to the task history.
    pub async fn append_history(&self, id: &str, message: A2AMessage) -> Result<A2ATask, AgentError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| AgentError::Protocol(format!("unknown task {}", id)))?;
        if task.status.state.is_terminal() {
            return Err(AgentError::Protocol(format!(
                "task {} is terminal; history update rejected",
                id
            )));
        }
        task.history.get_or_insert_with(Vec::new).push(message);
        task.status.timestamp = Utc::now();
        Ok(task.clone())
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_and_get() {
        let store = TaskStore::new();
        store.add(A2ATask::submitted("t1", "c1")).await.unwrap();
        let task = store.get("t1").await.unwrap();
        assert_eq!(task.status.state, TaskState::Submitted);
        assert!(store.get("t2").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let store = TaskStore::new();
        store.add(A2ATask::submitted("t1", "c1")).await.unwrap();
        assert!(store.add(A2ATask::submitted("t1", "c1")).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_status_updates_are_ordered() {
        let store = TaskStore::new();
        store.add(A2ATask::submitted("t1", "c1")).await.unwrap();

        let working = store
            .update_status("t1", TaskStatus::now(TaskState::Working))
            .await
            .unwrap();
        let completed = store
            .update_status("t1", TaskStatus::now(TaskState::Completed))
            .await
            .unwrap();
        assert!(completed.status.timestamp >= working.status.timestamp);
        assert_eq!(completed.status.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_terminal_task_rejects_all_mutations() {
        let store = TaskStore::new();
        store.add(A2ATask::submitted("t1", "c1")).await.unwrap();
        store
            .update_status("t1", TaskStatus::now(TaskState::Completed))
            .await
            .unwrap();

        let before = store.get("t1").await.unwrap();
        assert!(store
            .update_status("t1", TaskStatus::now(TaskState::Working))
            .await
            .is_err());
        assert!(store
            .append_artifact("t1", Artifact::text("late"), false)
            .await
            .is_err());
        assert!(store
            .append_history("t1", A2AMessage::user_text("late"))
            .await
            .is_err());

        // The task is unchanged by the rejected mutations.
        assert_eq!(store.get("t1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_artifact_append_extends_existing() {
        let store = TaskStore::new();
        store.add(A2ATask::submitted("t1", "c1")).await.unwrap();

        let mut artifact = Artifact::text("part one");
        artifact.artifact_id = "a1".to_string();
        store.append_artifact("t1", artifact, false).await.unwrap();

        let mut continuation = Artifact::text(" part two");
        continuation.artifact_id = "a1".to_string();
        store
            .append_artifact("t1", continuation, true)
            .await
            .unwrap();

        let task = store.get("t1").await.unwrap();
        let artifacts = task.artifacts.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].parts.len(), 2);
    }

    #[tokio::test]
    async fn test_distinct_artifacts_accumulate() {
        let store = TaskStore::new();
        store.add(A2ATask::submitted("t1", "c1")).await.unwrap();
        store
            .append_artifact("t1", Artifact::text("one"), false)
            .await
            .unwrap();
        store
            .append_artifact("t1", Artifact::text("two"), false)
            .await
            .unwrap();
        assert_eq!(store.get("t1").await.unwrap().artifacts.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_appends_in_order() {
        let store = TaskStore::new();
        store.add(A2ATask::submitted("t1", "c1")).await.unwrap();
        store
            .append_history("t1", A2AMessage::user_text("first"))
            .await
            .unwrap();
        store
            .append_history("t1", A2AMessage::agent_text("second"))
            .await
            .unwrap();

        let history = store.get("t1").await.unwrap().history.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), "first");
        assert_eq!(history[1].text(), "second");
    }

    #[tokio::test]
    async fn test_concurrent_history_appends_all_land() {
        let store = Arc::new(TaskStore::new());
        store.add(A2ATask::submitted("t1", "c1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_history("t1", A2AMessage::user_text(format!("m{}", i)))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("t1").await.unwrap().history.unwrap().len(), 16);
    }
}
