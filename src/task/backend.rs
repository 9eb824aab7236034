//! Execution backend trait: the abstraction task engines run work on
//!
//! A backend accepts a future under an [`ExecutionKey`], runs it detached
//! from the submitting request, and exposes the execution's state both as a
//! point-in-time snapshot and as a stream of change events.

use super::ExecutionKey;
use crate::error::Result;
use crate::protocol::TaskStatus;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Unit of work handed to a backend
pub type Work = BoxFuture<'static, Result<Value>>;

/// Backend-side execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl From<ExecutionState> for TaskStatus {
    fn from(state: ExecutionState) -> Self {
        match state {
            ExecutionState::Scheduled => TaskStatus::Submitted,
            ExecutionState::Running => TaskStatus::Working,
            ExecutionState::Completed => TaskStatus::Completed,
            ExecutionState::Failed => TaskStatus::Failed,
            ExecutionState::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Progress reported by running work
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub message: Option<String>,
    pub progress: Option<f64>,
    pub total: Option<f64>,
}

/// Point-in-time view of an execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSnapshot {
    pub state: ExecutionState,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub progress: Option<Progress>,
}

impl ExecutionSnapshot {
    pub fn scheduled() -> Self {
        Self {
            state: ExecutionState::Scheduled,
            result: None,
            error: None,
            progress: None,
        }
    }
}

/// Change event emitted by [`Execution::subscribe`]
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    State {
        state: ExecutionState,
        error: Option<String>,
    },
    Progress(Progress),
}

impl ExecutionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::State { state, .. } if state.is_terminal())
    }
}

/// Handle to one submitted execution
#[async_trait]
pub trait Execution: Send + Sync {
    fn key(&self) -> &ExecutionKey;

    /// Current state, result and error
    async fn snapshot(&self) -> Result<ExecutionSnapshot>;

    /// Stream of state changes, starting with the current state and ending
    /// after the first terminal state
    fn subscribe(&self) -> BoxStream<'static, ExecutionEvent>;
}

/// Core trait for execution backends
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend name (e.g., "memory")
    fn name(&self) -> &str;

    /// Start `work` under `key` without waiting for it.
    ///
    /// `ttl` is how long the finished execution stays queryable.
    async fn submit(&self, key: ExecutionKey, work: Work, ttl: Duration) -> Result<()>;

    /// Look up an execution; `None` once it is unknown or expired
    async fn get_execution(&self, key: &ExecutionKey) -> Result<Option<Arc<dyn Execution>>>;

    /// Ask the backend to stop an execution.
    ///
    /// Default implementation has no native cancellation and returns `false`.
    /// The engine records the cancellation either way.
    async fn cancel(&self, _key: &ExecutionKey) -> Result<bool> {
        Ok(false)
    }
}
