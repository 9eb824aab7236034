//! Middleware: message-level interceptors around every catalog request
//!
//! Middleware runs as an onion: the first registered middleware is the
//! outermost layer. Each layer receives the request context and a [`Next`]
//! continuation; it may adjust the context, call `next.run(ctx)` and adjust
//! the reply, or return early without calling it.

use crate::context::{DispatchContext, Reply};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod auth;
pub mod bulk;
pub mod injection;
pub mod logging;

pub use auth::AuthMiddleware;
pub use bulk::{BulkCallResult, BulkToolCaller};
pub use injection::ToolInjection;
pub use logging::LoggingMiddleware;

/// Message-level interceptor
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Middleware name used in logs
    fn name(&self) -> &str;

    /// Handle a request, calling `next.run(ctx)` to continue inward
    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) -> Result<Reply>;
}

/// Innermost handler the middleware chain wraps
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: &mut DispatchContext) -> Result<Reply>;
}

/// Continuation into the rest of the chain
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { chain, endpoint }
    }

    /// Invoke the next middleware, or the endpoint once the chain is exhausted
    pub async fn run(self, ctx: &mut DispatchContext) -> Result<Reply> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.handle(
                    ctx,
                    Next {
                        chain: rest,
                        endpoint: self.endpoint,
                    },
                )
                .await
            }
            None => self.endpoint.call(ctx).await,
        }
    }
}

/// Ordered middleware list
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    /// Run `ctx` through every layer and then `endpoint`
    pub async fn dispatch(&self, ctx: &mut DispatchContext, endpoint: &dyn Endpoint) -> Result<Reply> {
        Next::new(&self.layers, endpoint).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Request;
    use crate::error::McpError;
    use crate::protocol::ToolResult;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Records entry and exit order into a shared log
    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) -> Result<Reply> {
            self.log.lock().unwrap().push(format!("{}:before", self.label));
            let reply = next.run(ctx).await;
            self.log.lock().unwrap().push(format!("{}:after", self.label));
            reply
        }
    }

    struct Gate;

    #[async_trait]
    impl Middleware for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        async fn handle(&self, _ctx: &mut DispatchContext, _next: Next<'_>) -> Result<Reply> {
            Err(McpError::AuthorizationDenied("closed".into()))
        }
    }

    struct Stamp;

    #[async_trait]
    impl Middleware for Stamp {
        fn name(&self) -> &str {
            "stamp"
        }

        async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) -> Result<Reply> {
            ctx.scratch.insert("stamp".into(), json!("outer"));
            next.run(ctx).await
        }
    }

    struct Echo {
        hits: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, ctx: &mut DispatchContext) -> Result<Reply> {
            *self.hits.lock().unwrap() += 1;
            let stamp = ctx.scratch.get("stamp").cloned().unwrap_or(Value::Null);
            Ok(Reply::ToolResult(ToolResult::json(stamp)))
        }
    }

    fn ctx() -> DispatchContext {
        DispatchContext::new(
            "s",
            Request::CallTool {
                name: "t".into(),
                arguments: json!({}),
            },
        )
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(Recorder { label: "a", log: log.clone() }));
        chain.push(Arc::new(Recorder { label: "b", log: log.clone() }));

        let endpoint = Echo { hits: Arc::new(Mutex::new(0)) };
        chain.dispatch(&mut ctx(), &endpoint).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:before", "b:before", "b:after", "a:after"]
        );
        assert_eq!(chain.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_layers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(Mutex::new(0));
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(Gate));
        chain.push(Arc::new(Recorder { label: "inner", log: log.clone() }));

        let endpoint = Echo { hits: hits.clone() };
        let err = chain.dispatch(&mut ctx(), &endpoint).await.unwrap_err();

        assert!(matches!(err, McpError::AuthorizationDenied(_)));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scratch_reaches_endpoint() {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(Stamp));
        let endpoint = Echo { hits: Arc::new(Mutex::new(0)) };

        let reply = chain.dispatch(&mut ctx(), &endpoint).await.unwrap();
        let result = reply.into_tool_result().unwrap();
        assert_eq!(result.structured_content, Some(json!("outer")));
    }

    #[tokio::test]
    async fn test_empty_chain_calls_endpoint() {
        let hits = Arc::new(Mutex::new(0));
        let chain = MiddlewareChain::new();
        chain
            .dispatch(&mut ctx(), &Echo { hits: hits.clone() })
            .await
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
