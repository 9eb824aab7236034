//! Task engine: submission, status, results and cancellation
//!
//! The engine owns the [`TaskRegistry`] and drives an [`ExecutionBackend`].
//! Components not opted into background execution still accept task
//! requests: their work runs inline and the task is reported as already
//! finished.

use super::backend::{Execution, ExecutionBackend, ExecutionEvent, Work};
use super::notify::{notify_status, spawn_status_listener, NotificationSink};
use super::registry::{TaskOutcome, TaskRecord, TaskRegistry};
use super::status_message;
use crate::config::TaskConfig;
use crate::error::{McpError, Result};
use crate::protocol::{ListTasksResult, TaskInfo, TaskRequest, TaskStatus, RELATED_TASK_META_KEY};
use crate::types::{ComponentKind, TaskMode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One call to run as a task
pub struct Submission {
    pub session_id: String,
    pub request: TaskRequest,
    pub kind: ComponentKind,
    pub component: String,
    pub mode: TaskMode,
    pub work: Work,
    pub notifier: Option<Arc<dyn NotificationSink>>,
}

impl Submission {
    pub fn new(
        session_id: impl Into<String>,
        request: TaskRequest,
        kind: ComponentKind,
        component: impl Into<String>,
        mode: TaskMode,
        work: Work,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request,
            kind,
            component: component.into(),
            mode,
            work,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn NotificationSink>>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Session-scoped background task manager
pub struct TaskEngine {
    backend: Arc<dyn ExecutionBackend>,
    registry: Arc<TaskRegistry>,
    config: TaskConfig,
}

impl TaskEngine {
    pub fn new(backend: Arc<dyn ExecutionBackend>, config: TaskConfig) -> Self {
        Self {
            backend,
            registry: Arc::new(TaskRegistry::new()),
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Reject synchronous calls to components that only run as tasks
    pub fn check_mode(mode: TaskMode, task_requested: bool, kind: ComponentKind, key: &str) -> Result<()> {
        if mode == TaskMode::Required && !task_requested {
            return Err(McpError::MethodNotFound(format!(
                "{} '{}' must be called as a task",
                kind, key
            )));
        }
        Ok(())
    }

    /// Start a task and return its handle without waiting for the work,
    /// unless the component runs inline.
    pub async fn submit(&self, submission: Submission) -> Result<TaskInfo> {
        let Submission {
            session_id,
            request,
            kind,
            component,
            mode,
            work,
            notifier,
        } = submission;

        let task_id = request
            .task_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let ttl_ms = self.config.effective_ttl(request.ttl);
        let record = TaskRecord::new(
            &session_id,
            &task_id,
            kind,
            &component,
            ttl_ms,
            self.config.poll_interval_ms,
        )
        .with_notifier(notifier.clone());

        if !mode.supports_tasks() {
            return self.run_inline(record, work).await;
        }

        self.registry.insert(record.clone()).await?;
        let ttl = Duration::from_millis(ttl_ms);
        if let Err(e) = self
            .backend
            .submit(record.execution_key.clone(), work, ttl)
            .await
        {
            self.registry.remove(&session_id, &task_id).await;
            return Err(e);
        }

        let info = self.info(&record, TaskStatus::Submitted, None);
        tracing::info!(
            session = %session_id,
            task_id = %task_id,
            component = %component,
            backend = %self.backend.name(),
            ttl_ms,
            "Task submitted"
        );

        match self.backend.get_execution(&record.execution_key).await {
            Ok(Some(execution)) => {
                spawn_retention_clock(
                    execution.clone(),
                    self.registry.clone(),
                    session_id.clone(),
                    task_id.clone(),
                );
                if let (Some(sink), true) = (notifier, self.config.notifications) {
                    spawn_status_listener(execution, sink, self.registry.clone(), info.clone());
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Submitted execution not observable")
            }
        }
        Ok(info)
    }

    async fn run_inline(&self, record: TaskRecord, work: Work) -> Result<TaskInfo> {
        let session_id = record.session_id.clone();
        let task_id = record.task_id.clone();
        self.registry
            .insert(record.clone().with_outcome(TaskOutcome::Pending))
            .await?;
        tracing::debug!(
            session = %session_id,
            task_id = %task_id,
            component = %record.component,
            "Component not task-enabled, running inline"
        );

        let outcome = match work.await {
            Ok(value) => TaskOutcome::Completed(value),
            Err(e) => TaskOutcome::Failed(e.to_string()),
        };
        let (status, error) = match &outcome {
            TaskOutcome::Failed(e) => (TaskStatus::Failed, Some(e.clone())),
            _ => (TaskStatus::Completed, None),
        };
        self.registry
            .complete_inline(&session_id, &task_id, outcome)
            .await;
        Ok(self.info(&record, status, error))
    }

    fn info(&self, record: &TaskRecord, status: TaskStatus, error: Option<String>) -> TaskInfo {
        TaskInfo {
            task_id: record.task_id.clone(),
            status,
            created_at: record.created_at.to_rfc3339(),
            ttl: record.ttl_ms,
            poll_interval: record.poll_interval_ms,
            status_message: status_message(status, error.as_deref()),
            error,
        }
    }

    fn unknown(&self, task_id: &str) -> TaskInfo {
        TaskInfo {
            task_id: task_id.to_string(),
            status: TaskStatus::Unknown,
            created_at: Utc::now().to_rfc3339(),
            ttl: self.config.default_ttl_ms,
            poll_interval: self.config.poll_interval_ms,
            status_message: None,
            error: None,
        }
    }

    async fn resolve(&self, record: &TaskRecord) -> Result<(TaskStatus, Option<String>)> {
        if self.registry.is_cancelled(&record.execution_key).await {
            return Ok((TaskStatus::Cancelled, None));
        }
        match &record.inline {
            Some(TaskOutcome::Pending) => Ok((TaskStatus::Working, None)),
            Some(TaskOutcome::Completed(_)) => Ok((TaskStatus::Completed, None)),
            Some(TaskOutcome::Failed(e)) => Ok((TaskStatus::Failed, Some(e.clone()))),
            None => match self.backend.get_execution(&record.execution_key).await? {
                Some(execution) => {
                    let snapshot = execution.snapshot().await?;
                    if snapshot.state.is_terminal() && !record.is_finished() {
                        self.registry
                            .mark_finished(&record.session_id, &record.task_id)
                            .await;
                    }
                    Ok((snapshot.state.into(), snapshot.error))
                }
                None => Ok((TaskStatus::Unknown, None)),
            },
        }
    }

    async fn record(&self, session_id: &str, task_id: &str) -> Result<TaskRecord> {
        self.registry
            .get(session_id, task_id)
            .await
            .ok_or_else(|| McpError::Validation(format!("Task '{}' not found", task_id)))
    }

    /// Current state of a task; unknown or expired ids report `unknown`
    pub async fn status(&self, session_id: &str, task_id: &str) -> Result<TaskInfo> {
        let Some(record) = self.registry.get(session_id, task_id).await else {
            return Ok(self.unknown(task_id));
        };
        let (status, error) = self.resolve(&record).await?;
        Ok(self.info(&record, status, error))
    }

    /// Wait for a task to finish and return its result value.
    ///
    /// Failed and cancelled tasks return [`McpError::Task`].
    pub async fn result(&self, session_id: &str, task_id: &str) -> Result<Value> {
        let key = self.record(session_id, task_id).await?.execution_key;
        let mut changes = self.registry.changes();
        let mut events: Option<BoxStream<'static, ExecutionEvent>> = None;
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if self.registry.is_cancelled(&key).await {
                return Err(McpError::Task(format!("Task '{}' was cancelled", task_id)));
            }
            let record = self.record(session_id, task_id).await?;
            match record.inline {
                Some(TaskOutcome::Completed(value)) => return Ok(value),
                Some(TaskOutcome::Failed(e)) => return Err(McpError::Task(e)),
                Some(TaskOutcome::Pending) => {
                    let _ = changes.changed().await;
                    continue;
                }
                None => {}
            }

            let Some(execution) = self.backend.get_execution(&key).await? else {
                return Err(McpError::Task(format!(
                    "Task '{}' is no longer available",
                    task_id
                )));
            };
            let snapshot = execution.snapshot().await?;
            match snapshot.state.into() {
                TaskStatus::Completed => return Ok(snapshot.result.unwrap_or(Value::Null)),
                TaskStatus::Failed => {
                    return Err(McpError::Task(
                        snapshot.error.unwrap_or_else(|| "Task failed".to_string()),
                    ))
                }
                TaskStatus::Cancelled => {
                    return Err(McpError::Task(format!("Task '{}' was cancelled", task_id)))
                }
                _ => {}
            }

            let stream = events.get_or_insert_with(|| execution.subscribe());
            tokio::select! {
                event = stream.next() => {
                    if event.is_none() {
                        tokio::time::sleep(poll).await;
                    }
                }
                _ = changes.changed() => {}
            }
        }
    }

    /// Mark a task cancelled.
    ///
    /// The backend is asked to stop the work, but the cancellation is
    /// recorded whether or not it can.
    pub async fn cancel(&self, session_id: &str, task_id: &str) -> Result<TaskInfo> {
        let record = self.record(session_id, task_id).await?;
        match self.backend.cancel(&record.execution_key).await {
            Ok(native) => {
                tracing::debug!(task_id = %task_id, native, "Backend cancel requested")
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Backend cancel failed")
            }
        }
        if self.registry.mark_cancelled(&record.execution_key).await {
            tracing::info!(session = %session_id, task_id = %task_id, "Task cancelled");
        }

        let info = self.info(&record, TaskStatus::Cancelled, None);
        if let (Some(sink), true) = (&record.notifier, self.config.notifications) {
            notify_status(sink.as_ref(), &info).await;
        }
        Ok(info)
    }

    /// Same as [`cancel`](Self::cancel); the id stays known so later
    /// status queries report `cancelled`.
    pub async fn delete(&self, session_id: &str, task_id: &str) -> Result<TaskInfo> {
        self.cancel(session_id, task_id).await
    }

    /// One page of a session's tasks in submission order.
    ///
    /// The cursor names the last task of the previous page, so tasks that
    /// expire between pages never shift the next page.
    pub async fn list(
        &self,
        session_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ListTasksResult> {
        let after = cursor.map(decode_cursor).transpose()?;
        let limit = limit.unwrap_or(self.config.list_page_size).max(1);
        let records: Vec<TaskRecord> = self
            .registry
            .list(session_id)
            .await
            .into_iter()
            .filter(|r| after.map_or(true, |seq| r.seq > seq))
            .collect();

        let mut tasks = Vec::new();
        for record in records.iter().take(limit) {
            let (status, error) = self.resolve(record).await?;
            tasks.push(self.info(record, status, error));
        }
        let next_cursor = match records.get(limit) {
            Some(_) => records.get(limit - 1).map(encode_cursor),
            None => None,
        };
        Ok(ListTasksResult { tasks, next_cursor })
    }

    /// Drop all tasks of a closed session
    pub async fn close_session(&self, session_id: &str) {
        let dropped = self.registry.forget_session(session_id).await;
        if dropped > 0 {
            tracing::debug!(session = %session_id, dropped, "Session tasks forgotten");
        }
    }
}

/// Start the retention clock once the execution stops
fn spawn_retention_clock(
    execution: Arc<dyn Execution>,
    registry: Arc<TaskRegistry>,
    session_id: String,
    task_id: String,
) {
    tokio::spawn(async move {
        let mut events = execution.subscribe();
        while let Some(event) = events.next().await {
            if event.is_terminal() {
                break;
            }
        }
        registry.mark_finished(&session_id, &task_id).await;
    });
}

fn encode_cursor(record: &TaskRecord) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}:{}", record.seq, record.task_id))
}

fn decode_cursor(cursor: &str) -> Result<u64> {
    let invalid = || McpError::Validation(format!("Invalid cursor: {}", cursor));
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (seq, _task_id) = text.split_once(':').ok_or_else(invalid)?;
    seq.parse().map_err(|_| invalid())
}

/// Tag a result with the task it came from
pub fn attach_related_task(value: &mut Value, task_id: &str) {
    let Value::Object(map) = value else {
        return;
    };
    let meta = map
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(meta) = meta {
        meta.insert(RELATED_TASK_META_KEY.to_string(), json!({ "taskId": task_id }));
    }
}
