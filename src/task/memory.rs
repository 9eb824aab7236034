//! In-memory execution backend
//!
//! Runs each submission on its own tokio task. State lives in a `watch`
//! channel per execution so any number of waiters can follow it. Finished
//! executions are dropped `ttl` after they reach a terminal state.
//! No persistence, no native cancellation.

use super::backend::{
    Execution, ExecutionBackend, ExecutionEvent, ExecutionSnapshot, ExecutionState, Progress, Work,
};
use super::ExecutionKey;
use crate::error::{McpError, Result};
use async_trait::async_trait;
use futures::future::{ready, FutureExt};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

type Executions = Arc<Mutex<HashMap<ExecutionKey, Arc<MemoryExecution>>>>;

/// In-memory execution backend for development, tests and single-process servers
#[derive(Clone, Default)]
pub struct MemoryBackend {
    executions: Executions,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ExecutionKey, Arc<MemoryExecution>>>> {
        self.executions
            .lock()
            .map_err(|e| McpError::Backend(format!("Execution table poisoned: {}", e)))
    }

    /// Number of executions currently retained
    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish progress for a running execution. Returns `false` if the key
    /// is unknown or already finished.
    pub fn report_progress(&self, key: &ExecutionKey, progress: Progress) -> bool {
        let execution = match self.lock() {
            Ok(map) => map.get(key).cloned(),
            Err(_) => None,
        };
        let Some(execution) = execution else {
            return false;
        };
        execution.tx.send_if_modified(|snapshot| {
            if snapshot.state.is_terminal() {
                return false;
            }
            snapshot.progress = Some(progress);
            true
        })
    }
}

struct MemoryExecution {
    key: ExecutionKey,
    tx: watch::Sender<ExecutionSnapshot>,
}

#[async_trait]
impl Execution for MemoryExecution {
    fn key(&self) -> &ExecutionKey {
        &self.key
    }

    async fn snapshot(&self) -> Result<ExecutionSnapshot> {
        Ok(self.tx.borrow().clone())
    }

    fn subscribe(&self) -> BoxStream<'static, ExecutionEvent> {
        events(self.tx.subscribe())
    }
}

/// Turn snapshot updates into change events, ending after the terminal state
fn events(rx: watch::Receiver<ExecutionSnapshot>) -> BoxStream<'static, ExecutionEvent> {
    let mut last: Option<(ExecutionState, Option<Progress>)> = None;
    WatchStream::new(rx)
        .filter_map(move |snapshot| ready(diff(&mut last, snapshot)))
        .scan(false, |ended, event| {
            if *ended {
                return ready(None);
            }
            *ended = event.is_terminal();
            ready(Some(event))
        })
        .boxed()
}

fn diff(
    last: &mut Option<(ExecutionState, Option<Progress>)>,
    snapshot: ExecutionSnapshot,
) -> Option<ExecutionEvent> {
    let (state_changed, progress_changed) = match last {
        Some((state, progress)) => (*state != snapshot.state, *progress != snapshot.progress),
        None => (true, false),
    };
    *last = Some((snapshot.state, snapshot.progress.clone()));

    if state_changed {
        Some(ExecutionEvent::State {
            state: snapshot.state,
            error: snapshot.error,
        })
    } else if progress_changed {
        snapshot.progress.map(ExecutionEvent::Progress)
    } else {
        None
    }
}

#[async_trait]
impl ExecutionBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn submit(&self, key: ExecutionKey, work: Work, ttl: Duration) -> Result<()> {
        let (tx, _) = watch::channel(ExecutionSnapshot::scheduled());
        let execution = Arc::new(MemoryExecution {
            key: key.clone(),
            tx,
        });
        {
            let mut map = self.lock()?;
            if map.contains_key(&key) {
                return Err(McpError::Backend(format!(
                    "Execution '{}' already exists",
                    key
                )));
            }
            map.insert(key.clone(), execution.clone());
        }

        let executions = self.executions.clone();
        tokio::spawn(async move {
            execution
                .tx
                .send_modify(|s| s.state = ExecutionState::Running);

            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            execution.tx.send_modify(|s| {
                s.progress = None;
                match outcome {
                    Ok(Ok(value)) => {
                        s.state = ExecutionState::Completed;
                        s.result = Some(value);
                    }
                    Ok(Err(e)) => {
                        s.state = ExecutionState::Failed;
                        s.error = Some(e.to_string());
                    }
                    Err(_) => {
                        s.state = ExecutionState::Failed;
                        s.error = Some("execution panicked".to_string());
                    }
                }
            });
            tracing::debug!(key = %execution.key, "Execution finished");

            tokio::time::sleep(ttl).await;
            if let Ok(mut map) = executions.lock() {
                map.remove(&execution.key);
            }
        });

        tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Execution submitted");
        Ok(())
    }

    async fn get_execution(&self, key: &ExecutionKey) -> Result<Option<Arc<dyn Execution>>> {
        Ok(self
            .lock()?
            .get(key)
            .cloned()
            .map(|e| e as Arc<dyn Execution>))
    }
}
