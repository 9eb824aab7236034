//! Server lifespan hooks
//!
//! Hooks run their setup in registration order when the server starts and
//! their teardown in reverse order when it shuts down. Values a hook wants to
//! share with handlers or with its own teardown go into [`LifespanState`].

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Shared values produced by hook setup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifespanState {
    values: HashMap<String, Value>,
}

impl LifespanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Merge `other` into this state; later values win
    pub fn merge(&mut self, other: LifespanState) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One startup/shutdown participant
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;

    async fn setup(&self, state: &mut LifespanState) -> Result<()>;

    async fn teardown(&self, _state: &LifespanState) -> Result<()> {
        Ok(())
    }
}

type SetupFn = Arc<dyn Fn() -> BoxFuture<'static, Result<LifespanState>> + Send + Sync>;
type TeardownFn = Arc<dyn Fn(LifespanState) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Hook built from closures.
///
/// Setup returns the values to publish; teardown receives a snapshot of the
/// whole lifespan state.
#[derive(Clone)]
pub struct FnHook {
    name: String,
    setup: SetupFn,
    teardown: Option<TeardownFn>,
}

impl FnHook {
    pub fn new<F, Fut>(name: impl Into<String>, setup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<LifespanState>> + Send + 'static,
    {
        Self {
            name: name.into(),
            setup: Arc::new(move || Box::pin(setup())),
            teardown: None,
        }
    }

    pub fn with_teardown<F, Fut>(mut self, teardown: F) -> Self
    where
        F: Fn(LifespanState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.teardown = Some(Arc::new(move |state| Box::pin(teardown(state))));
        self
    }
}

#[async_trait]
impl LifecycleHook for FnHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self, state: &mut LifespanState) -> Result<()> {
        let produced = (self.setup)().await?;
        state.merge(produced);
        Ok(())
    }

    async fn teardown(&self, state: &LifespanState) -> Result<()> {
        match &self.teardown {
            Some(teardown) => teardown(state.clone()).await,
            None => Ok(()),
        }
    }
}

/// Ordered hook list
#[derive(Clone, Default)]
pub struct Lifecycle {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
    }

    /// Append another lifecycle's hooks after this one's
    pub fn extend(&mut self, other: Lifecycle) {
        self.hooks.extend(other.hooks);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every setup in order.
    ///
    /// If one fails, the hooks that already started are torn down in reverse
    /// and the error is returned.
    pub async fn start(&self) -> Result<LifespanState> {
        let mut state = LifespanState::new();
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.setup(&mut state).await {
                tracing::warn!(hook = %hook.name(), error = %e, "Lifecycle setup failed, rolling back");
                Self::teardown_all(&self.hooks[..index], &state).await;
                return Err(e);
            }
            tracing::info!(hook = %hook.name(), "Lifecycle hook started");
        }
        Ok(state)
    }

    /// Run every teardown in reverse order, continuing past failures
    pub async fn shutdown(&self, state: &LifespanState) {
        Self::teardown_all(&self.hooks, state).await;
    }

    async fn teardown_all(hooks: &[Arc<dyn LifecycleHook>], state: &LifespanState) {
        for hook in hooks.iter().rev() {
            match hook.teardown(state).await {
                Ok(()) => tracing::info!(hook = %hook.name(), "Lifecycle hook stopped"),
                Err(e) => {
                    tracing::warn!(hook = %hook.name(), error = %e, "Lifecycle teardown failed")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::McpError;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> FnHook {
        let setup_log = log.clone();
        FnHook::new(name, move || {
            let log = setup_log.clone();
            async move {
                log.lock().unwrap().push(format!("setup:{}", name));
                let mut state = LifespanState::new();
                state.insert(name, json!(true));
                Ok(state)
            }
        })
        .with_teardown(move |_| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("teardown:{}", name));
                Ok(())
            }
        })
    }

    fn failing(name: &'static str) -> FnHook {
        FnHook::new(name, || async {
            Err::<LifespanState, _>(McpError::Config("db unreachable".into()))
        })
    }

    #[tokio::test]
    async fn test_setup_in_order_teardown_reversed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle.push(Arc::new(recording("db", log.clone())));
        lifecycle.push(Arc::new(recording("cache", log.clone())));

        let state = lifecycle.start().await.unwrap();
        assert_eq!(state.get("db"), Some(&json!(true)));
        assert_eq!(state.len(), 2);

        lifecycle.shutdown(&state).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["setup:db", "setup:cache", "teardown:cache", "teardown:db"]
        );
    }

    #[tokio::test]
    async fn test_failed_setup_rolls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle.push(Arc::new(recording("db", log.clone())));
        lifecycle.push(Arc::new(failing("broken")));
        lifecycle.push(Arc::new(recording("never", log.clone())));

        let err = lifecycle.start().await.unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
        assert_eq!(*log.lock().unwrap(), vec!["setup:db", "teardown:db"]);
    }

    #[tokio::test]
    async fn test_extend_concatenates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut first = Lifecycle::new();
        first.push(Arc::new(recording("a", log.clone())));
        let mut second = Lifecycle::new();
        second.push(Arc::new(recording("b", log.clone())));

        first.extend(second);
        assert_eq!(first.len(), 2);
        first.start().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["setup:a", "setup:b"]);
    }

    #[tokio::test]
    async fn test_teardown_failure_does_not_stop_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle.push(Arc::new(recording("first", log.clone())));
        lifecycle.push(Arc::new(
            FnHook::new("flaky", || async { Ok(LifespanState::new()) }).with_teardown(|_| async {
                Err(McpError::Internal("close failed".into()))
            }),
        ));

        let state = lifecycle.start().await.unwrap();
        lifecycle.shutdown(&state).await;
        assert_eq!(log.lock().unwrap().last().unwrap(), "teardown:first");
    }
}
