//! Task status push notifications
//!
//! Delivery is best effort: send failures are logged at `debug` and
//! dropped, and a listener never affects the task it follows.

use super::backend::{Execution, ExecutionEvent};
use super::registry::TaskRegistry;
use super::status_message;
use crate::error::{McpError, Result};
use crate::protocol::{methods, JsonRpcNotification, TaskInfo};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Transport-side push channel of one session
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: JsonRpcNotification) -> Result<()>;
}

#[async_trait]
impl NotificationSink for mpsc::UnboundedSender<JsonRpcNotification> {
    async fn send(&self, notification: JsonRpcNotification) -> Result<()> {
        mpsc::UnboundedSender::send(self, notification)
            .map_err(|_| McpError::Internal("notification channel closed".to_string()))
    }
}

/// Build a `notifications/tasks/status` message
pub fn status_notification(info: &TaskInfo) -> Result<JsonRpcNotification> {
    Ok(JsonRpcNotification::new(
        methods::TASK_STATUS_NOTIFICATION,
        Some(serde_json::to_value(info)?),
    ))
}

/// Send a status notification, swallowing any failure
pub async fn notify_status(sink: &dyn NotificationSink, info: &TaskInfo) {
    let notification = match status_notification(info) {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(task_id = %info.task_id, error = %e, "Failed to encode task status");
            return;
        }
    };
    if let Err(e) = sink.send(notification).await {
        tracing::debug!(task_id = %info.task_id, error = %e, "Task status notification dropped");
    }
}

/// Follow one execution and push its state changes to `sink`.
///
/// `base` supplies the task id, creation time, ttl and poll interval. The
/// listener stops at the first terminal state, when the event stream ends,
/// or once the client has cancelled the task.
pub fn spawn_status_listener(
    execution: Arc<dyn Execution>,
    sink: Arc<dyn NotificationSink>,
    registry: Arc<TaskRegistry>,
    base: TaskInfo,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = execution.subscribe();
        let mut info = base;
        while let Some(event) = events.next().await {
            if registry.is_cancelled(execution.key()).await {
                break;
            }
            match event {
                ExecutionEvent::State { state, error } => {
                    info.status = state.into();
                    info.status_message = status_message(info.status, error.as_deref());
                    info.error = error;
                }
                ExecutionEvent::Progress(progress) => match progress.message {
                    Some(message) => info.status_message = Some(message),
                    None => continue,
                },
            }
            notify_status(sink.as_ref(), &info).await;
        }
        tracing::debug!(task_id = %info.task_id, "Task status listener finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaskStatus;
    use crate::task::backend::ExecutionBackend;
    use crate::task::memory::MemoryBackend;
    use crate::task::ExecutionKey;
    use crate::types::ComponentKind;
    use serde_json::json;
    use std::time::Duration;

    struct Closed;

    #[async_trait]
    impl NotificationSink for Closed {
        async fn send(&self, _notification: JsonRpcNotification) -> Result<()> {
            Err(McpError::Internal("gone".into()))
        }
    }

    fn base(task_id: &str) -> TaskInfo {
        TaskInfo {
            task_id: task_id.into(),
            status: TaskStatus::Submitted,
            created_at: "2026-01-01T00:00:00Z".into(),
            ttl: 60_000,
            poll_interval: 1_000,
            status_message: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_listener_pushes_until_terminal() {
        let backend = MemoryBackend::new();
        let key = ExecutionKey::build("s", "t1", ComponentKind::Tool, "x");
        backend
            .submit(key.clone(), Box::pin(async { Ok::<_, McpError>(json!(1)) }), Duration::from_secs(60))
            .await
            .unwrap();
        let execution = backend.get_execution(&key).await.unwrap().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_status_listener(
            execution,
            Arc::new(tx),
            Arc::new(TaskRegistry::new()),
            base("t1"),
        );
        handle.await.unwrap();

        let mut last = None;
        while let Ok(n) = rx.try_recv() {
            assert_eq!(n.method, "notifications/tasks/status");
            last = n.params;
        }
        let last = last.unwrap();
        assert_eq!(last["taskId"], "t1");
        assert_eq!(last["status"], "completed");
        assert_eq!(last["statusMessage"], "Task completed successfully");
        assert!(last.get("_meta").is_none());
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        notify_status(&Closed, &base("t")).await;
    }
}
