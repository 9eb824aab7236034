//! Task id bookkeeping
//!
//! Maps `(session, task_id)` to the record of one submission and remembers
//! which executions a client cancelled. A single `tokio::sync::Mutex` guards
//! both tables; it is never held across a backend call.

use super::notify::NotificationSink;
use super::ExecutionKey;
use crate::error::{McpError, Result};
use crate::types::ComponentKind;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Outcome of work that runs inline instead of on the backend
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Pending,
    Completed(Value),
    Failed(String),
}

/// One submitted task
#[derive(Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub session_id: String,
    pub execution_key: ExecutionKey,
    pub kind: ComponentKind,
    pub component: String,
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal state, as far as the registry knows
    pub finished_at: Option<DateTime<Utc>>,
    /// Effective retention in milliseconds, counted from `finished_at`
    pub ttl_ms: u64,
    pub poll_interval_ms: u64,
    /// Registry-wide insertion sequence; orders listings and pages
    pub seq: u64,
    /// Set when the work already ran synchronously
    pub inline: Option<TaskOutcome>,
    /// Push channel of the submitting session
    pub notifier: Option<Arc<dyn NotificationSink>>,
}

impl TaskRecord {
    pub fn new(
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        kind: ComponentKind,
        component: impl Into<String>,
        ttl_ms: u64,
        poll_interval_ms: u64,
    ) -> Self {
        let session_id = session_id.into();
        let task_id = task_id.into();
        let component = component.into();
        Self {
            execution_key: ExecutionKey::build(&session_id, &task_id, kind, &component),
            task_id,
            session_id,
            kind,
            component,
            created_at: Utc::now(),
            finished_at: None,
            ttl_ms,
            poll_interval_ms,
            seq: 0,
            inline: None,
            notifier: None,
        }
    }

    pub fn with_outcome(mut self, outcome: TaskOutcome) -> Self {
        self.inline = Some(outcome);
        self
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn NotificationSink>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Unfinished tasks never expire
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(finished_at) = self.finished_at else {
            return false;
        };
        let age = now.signed_duration_since(finished_at).num_milliseconds();
        age > i64::try_from(self.ttl_ms).unwrap_or(i64::MAX)
    }

    fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at.get_or_insert(at);
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("task_id", &self.task_id)
            .field("session_id", &self.session_id)
            .field("execution_key", &self.execution_key)
            .field("component", &self.component)
            .field("created_at", &self.created_at)
            .field("finished_at", &self.finished_at)
            .field("ttl_ms", &self.ttl_ms)
            .field("seq", &self.seq)
            .field("inline", &self.inline)
            .finish()
    }
}

#[derive(Default)]
struct SessionTasks {
    records: HashMap<String, TaskRecord>,
}

impl SessionTasks {
    fn prune(&mut self, cancelled: &mut HashSet<ExecutionKey>, now: DateTime<Utc>) {
        self.records.retain(|_, record| {
            let expired = record.is_expired(now);
            if expired {
                cancelled.remove(&record.execution_key);
            }
            !expired
        });
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, SessionTasks>,
    cancelled: HashSet<ExecutionKey>,
    next_seq: u64,
}

impl RegistryState {
    /// Prune a session and drop it once nothing is left
    fn live_session(&mut self, session_id: &str) -> Option<&mut SessionTasks> {
        let session = self.sessions.get_mut(session_id)?;
        session.prune(&mut self.cancelled, Utc::now());
        if session.records.is_empty() {
            self.sessions.remove(session_id);
            return None;
        }
        self.sessions.get_mut(session_id)
    }

    fn record_mut(&mut self, session_id: &str, task_id: &str) -> Option<&mut TaskRecord> {
        self.sessions
            .get_mut(session_id)
            .and_then(|s| s.records.get_mut(task_id))
    }
}

/// Session-scoped task table plus the cancelled-execution set
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    /// Bumped on every cancellation and inline completion so waiters re-check
    epoch: watch::Sender<u64>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            state: Mutex::new(RegistryState::default()),
            epoch,
        }
    }

    /// Register a record; task ids are unique per session
    pub async fn insert(&self, mut record: TaskRecord) -> Result<()> {
        let mut guard = self.state.lock().await;
        let RegistryState {
            sessions,
            cancelled,
            next_seq,
        } = &mut *guard;
        let session = sessions.entry(record.session_id.clone()).or_default();
        session.prune(cancelled, Utc::now());

        if session.records.contains_key(&record.task_id) {
            return Err(McpError::Validation(format!(
                "Task '{}' already exists in this session",
                record.task_id
            )));
        }
        if matches!(
            record.inline,
            Some(TaskOutcome::Completed(_) | TaskOutcome::Failed(_))
        ) {
            record.finish(Utc::now());
        }
        record.seq = *next_seq;
        *next_seq += 1;
        session.records.insert(record.task_id.clone(), record);
        Ok(())
    }

    /// Look up a live record; expired records are dropped on access
    pub async fn get(&self, session_id: &str, task_id: &str) -> Option<TaskRecord> {
        let mut guard = self.state.lock().await;
        guard.live_session(session_id)?.records.get(task_id).cloned()
    }

    /// Live records of a session in submission order
    pub async fn list(&self, session_id: &str) -> Vec<TaskRecord> {
        let mut guard = self.state.lock().await;
        let Some(session) = guard.live_session(session_id) else {
            return Vec::new();
        };
        let mut records: Vec<TaskRecord> = session.records.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Record the outcome of an inline task. Returns `false` if the record is gone.
    pub async fn complete_inline(&self, session_id: &str, task_id: &str, outcome: TaskOutcome) -> bool {
        let updated = {
            let mut guard = self.state.lock().await;
            match guard.record_mut(session_id, task_id) {
                Some(record) => {
                    if outcome != TaskOutcome::Pending {
                        record.finish(Utc::now());
                    }
                    record.inline = Some(outcome);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.epoch.send_modify(|epoch| *epoch += 1);
        }
        updated
    }

    /// Start the retention clock of a task whose work has ended.
    /// Returns `false` if the record is gone.
    pub async fn mark_finished(&self, session_id: &str, task_id: &str) -> bool {
        let mut guard = self.state.lock().await;
        match guard.record_mut(session_id, task_id) {
            Some(record) => {
                record.finish(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Remove one record
    pub async fn remove(&self, session_id: &str, task_id: &str) -> Option<TaskRecord> {
        let mut guard = self.state.lock().await;
        let RegistryState {
            sessions, cancelled, ..
        } = &mut *guard;
        let session = sessions.get_mut(session_id)?;
        let record = session.records.remove(task_id)?;
        if session.records.is_empty() {
            sessions.remove(session_id);
        }
        cancelled.remove(&record.execution_key);
        Some(record)
    }

    /// Remember a client cancellation. Returns `false` if already cancelled.
    ///
    /// Cancellation is terminal, so the task's retention clock starts here.
    pub async fn mark_cancelled(&self, key: &ExecutionKey) -> bool {
        let inserted = {
            let mut guard = self.state.lock().await;
            if let Some(parts) = key.parts() {
                if let Some(record) = guard.record_mut(&parts.session_id, &parts.task_id) {
                    record.finish(Utc::now());
                }
            }
            guard.cancelled.insert(key.clone())
        };
        if inserted {
            self.epoch.send_modify(|epoch| *epoch += 1);
        }
        inserted
    }

    pub async fn is_cancelled(&self, key: &ExecutionKey) -> bool {
        self.state.lock().await.cancelled.contains(key)
    }

    /// Receiver that changes whenever a task is cancelled or an inline task finishes
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    /// Number of sessions that still hold live records
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Drop every record of a session
    pub async fn forget_session(&self, session_id: &str) -> usize {
        let mut guard = self.state.lock().await;
        let RegistryState {
            sessions, cancelled, ..
        } = &mut *guard;
        let Some(session) = sessions.remove(session_id) else {
            return 0;
        };
        for record in session.records.values() {
            cancelled.remove(&record.execution_key);
        }
        session.records.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
