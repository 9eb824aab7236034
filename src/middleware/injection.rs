//! Tool injection middleware
//!
//! Puts a fixed set of tools in front of every tool listing and answers
//! calls to them itself, without consulting transforms or providers. An
//! injected tool shadows any catalog tool with the same name.
//!
//! Injected tools always run synchronously; a task request for one is
//! ignored and the result is returned directly.

use super::{Middleware, Next};
use crate::context::{DispatchContext, Reply, Request};
use crate::error::Result;
use crate::types::{Tool, ToolContext};
use async_trait::async_trait;

/// Middleware serving extra tools alongside the catalog
pub struct ToolInjection {
    name: String,
    tools: Vec<Tool>,
}

impl ToolInjection {
    pub fn new(tools: Vec<Tool>) -> Self {
        Self {
            name: "tool_injection".to_string(),
            tools,
        }
    }

    /// Name reported in logs and by `MiddlewareChain::names`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    fn find(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

#[async_trait]
impl Middleware for ToolInjection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) -> Result<Reply> {
        let injected = match &ctx.request {
            Request::ListTools => None,
            Request::CallTool { name, arguments } => match self.find(name) {
                Some(tool) => Some((tool.clone(), arguments.clone())),
                None => return next.run(ctx).await,
            },
            _ => return next.run(ctx).await,
        };

        let Some((tool, arguments)) = injected else {
            return match next.run(ctx).await? {
                Reply::Tools(catalog) => {
                    let mut tools = self.tools.clone();
                    tools.extend(catalog.into_iter().filter(|t| self.find(&t.name).is_none()));
                    Ok(Reply::Tools(tools))
                }
                other => Ok(other),
            };
        };

        tracing::debug!(
            middleware = %self.name,
            session = %ctx.session_id,
            tool = %tool.name,
            "Calling injected tool"
        );
        let result = tool.run(arguments, ToolContext::new(ctx.clone())).await?;
        Ok(Reply::ToolResult(result))
    }
}
