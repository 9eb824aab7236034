//! Background task execution
//!
//! A call made "as a task" returns a [`TaskInfo`](crate::protocol::TaskInfo)
//! handle immediately. The work runs on an [`ExecutionBackend`]; the
//! [`TaskEngine`] maps client-visible task ids to backend executions, per
//! session, and remembers client cancellations the backend cannot express.
//!
//! ```text
//! submitted ──► working ──► completed
//!                   │  └──► failed
//!                   └─────► cancelled
//! ```

use crate::protocol::TaskStatus;
use crate::types::ComponentKind;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fmt;

pub mod backend;
pub mod engine;
pub mod memory;
pub mod notify;
pub mod registry;

pub use backend::{
    Execution, ExecutionBackend, ExecutionEvent, ExecutionSnapshot, ExecutionState, Progress, Work,
};
pub use engine::{Submission, TaskEngine};
pub use memory::MemoryBackend;
pub use notify::{spawn_status_listener, NotificationSink};
pub use registry::{TaskOutcome, TaskRecord, TaskRegistry};

/// Human-readable message for a task status
pub fn status_message(status: TaskStatus, error: Option<&str>) -> Option<String> {
    match status {
        TaskStatus::Completed => Some("Task completed successfully".to_string()),
        TaskStatus::Failed => Some(match error {
            Some(e) => format!("Task failed: {}", e),
            None => "Task failed".to_string(),
        }),
        TaskStatus::Cancelled => Some("Task cancelled".to_string()),
        _ => None,
    }
}

/// Backend-facing identity of one task execution
///
/// Encodes session, client task id, component kind and component key so the
/// same client task id in two sessions never collides. Free-form segments are
/// base64url encoded; the separator cannot appear inside them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionKey(String);

/// Decoded parts of an [`ExecutionKey`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionKeyParts {
    pub session_id: String,
    pub task_id: String,
    pub kind: ComponentKind,
    pub component: String,
}

impl ExecutionKey {
    pub fn build(session_id: &str, task_id: &str, kind: ComponentKind, component: &str) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            URL_SAFE_NO_PAD.encode(session_id),
            URL_SAFE_NO_PAD.encode(task_id),
            kind.as_str(),
            URL_SAFE_NO_PAD.encode(component)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the key back into its segments
    pub fn parts(&self) -> Option<ExecutionKeyParts> {
        let mut segments = self.0.split(':');
        let session = segments.next()?;
        let task = segments.next()?;
        let kind = segments.next()?;
        let component = segments.next()?;
        if segments.next().is_some() {
            return None;
        }
        Some(ExecutionKeyParts {
            session_id: decode_segment(session)?,
            task_id: decode_segment(task)?,
            kind: ComponentKind::parse(kind)?,
            component: decode_segment(component)?,
        })
    }
}

fn decode_segment(segment: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    String::from_utf8(bytes).ok()
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let key = ExecutionKey::build("sess:1", "task/a", ComponentKind::Tool, "weather:get");
        let parts = key.parts().unwrap();
        assert_eq!(parts.session_id, "sess:1");
        assert_eq!(parts.task_id, "task/a");
        assert_eq!(parts.kind, ComponentKind::Tool);
        assert_eq!(parts.component, "weather:get");
    }

    #[test]
    fn test_same_task_id_differs_by_session() {
        let a = ExecutionKey::build("s1", "job", ComponentKind::Tool, "run");
        let b = ExecutionKey::build("s2", "job", ComponentKind::Tool, "run");
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(
            status_message(TaskStatus::Failed, Some("boom")).as_deref(),
            Some("Task failed: boom")
        );
        assert_eq!(
            status_message(TaskStatus::Cancelled, None).as_deref(),
            Some("Task cancelled")
        );
        assert!(status_message(TaskStatus::Working, None).is_none());
    }

    #[test]
    fn test_malformed_key() {
        assert!(ExecutionKey("nope".into()).parts().is_none());
        assert!(ExecutionKey("a:b:widget:c".into()).parts().is_none());
    }
}
