//! Authorization middleware
//!
//! Applies server-wide checks to every catalog request. Listings are
//! filtered; calls, reads and gets resolve the target component first and
//! are refused if any check fails. Stdio sessions have no identity and skip
//! the checks entirely.

use super::{Middleware, Next};
use crate::auth::{run_auth_checks, AccessToken, AuthCheck, AuthContext};
use crate::context::{DispatchContext, Operation, Reply, Transport};
use crate::error::{McpError, Result};
use crate::types::Component;
use async_trait::async_trait;

/// Middleware enforcing a list of checks with AND semantics
pub struct AuthMiddleware {
    checks: Vec<AuthCheck>,
}

impl AuthMiddleware {
    pub fn new(checks: Vec<AuthCheck>) -> Self {
        Self { checks }
    }

    pub fn with_check(mut self, check: AuthCheck) -> Self {
        self.checks.push(check);
        self
    }

    fn allows(&self, token: Option<&AccessToken>, component: &dyn Component) -> bool {
        run_auth_checks(&self.checks, &AuthContext::new(token, component)).is_allowed()
    }

    fn filter<T: Component>(&self, items: Vec<T>, token: Option<&AccessToken>) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| self.allows(token, item))
            .collect()
    }

    fn filter_reply(&self, reply: Reply, token: Option<&AccessToken>) -> Reply {
        match reply {
            Reply::Tools(items) => Reply::Tools(self.filter(items, token)),
            Reply::Resources(items) => Reply::Resources(self.filter(items, token)),
            Reply::ResourceTemplates(items) => Reply::ResourceTemplates(self.filter(items, token)),
            Reply::Prompts(items) => Reply::Prompts(self.filter(items, token)),
            other => other,
        }
    }

    async fn authorize_target(&self, ctx: &DispatchContext) -> Result<()> {
        let Some((kind, key)) = ctx.request.target() else {
            return Ok(());
        };
        let Some(catalog) = ctx.catalog.as_ref() else {
            tracing::warn!(kind = %kind, key = %key, "No catalog on context, denying");
            return Err(McpError::AuthorizationDenied(format!(
                "Authorization failed for {} '{}': missing context",
                kind, key
            )));
        };

        // Unknown targets fall through; the registry reports them as not found.
        let Some(component) = catalog.resolve(ctx, kind, key).await? else {
            return Ok(());
        };

        let decision = run_auth_checks(
            &self.checks,
            &AuthContext::new(ctx.token.as_ref(), &component),
        );
        if !decision.is_allowed() {
            tracing::debug!(
                session = %ctx.session_id,
                kind = %kind,
                key = %key,
                reason = ?decision,
                "Request denied by auth middleware"
            );
        }
        decision.into_result(kind, key, ctx.token.is_some())
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) -> Result<Reply> {
        if ctx.transport == Transport::Stdio || self.checks.is_empty() {
            return next.run(ctx).await;
        }

        match ctx.operation() {
            Operation::List => {
                let reply = next.run(ctx).await?;
                Ok(self.filter_reply(reply, ctx.token.as_ref()))
            }
            Operation::Call | Operation::Read | Operation::Get => {
                self.authorize_target(ctx).await?;
                next.run(ctx).await
            }
        }
    }
}
