//! Authorization checks
//!
//! Checks are predicates over an [`AuthContext`] combined with AND semantics.
//! A check answers `Ok(true)` (allow), `Ok(false)` (deny), or fails with a
//! [`CheckError`]. An explicit `Denied` propagates its message to the client;
//! an `Unexpected` failure is logged and treated as a deny, so a broken check
//! never grants access.

use crate::error::McpError;
use crate::types::{Component, ComponentKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Resolved access token supplied by the auth layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Expiry as unix seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// What a check sees: the caller's token and the component in question
pub struct AuthContext<'a> {
    pub token: Option<&'a AccessToken>,
    pub component: &'a dyn Component,
}

impl<'a> AuthContext<'a> {
    pub fn new(token: Option<&'a AccessToken>, component: &'a dyn Component) -> Self {
        Self { token, component }
    }
}

/// Failure raised by a check
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckError {
    /// Explicit denial whose message goes to the client verbatim
    #[error("{0}")]
    Denied(String),

    /// Anything else; never shown to the client
    #[error("unexpected check failure: {0}")]
    Unexpected(String),
}

type CheckFn = dyn Fn(&AuthContext<'_>) -> Result<bool, CheckError> + Send + Sync;

/// A named authorization predicate
#[derive(Clone)]
pub struct AuthCheck {
    name: String,
    check: Arc<CheckFn>,
}

impl AuthCheck {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&AuthContext<'_>) -> Result<bool, CheckError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, ctx: &AuthContext<'_>) -> Result<bool, CheckError> {
        (self.check)(ctx)
    }
}

impl fmt::Debug for AuthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthCheck").field(&self.name).finish()
    }
}

/// Allow any authenticated caller
pub fn require_auth() -> AuthCheck {
    AuthCheck::new("require_auth", |ctx| Ok(ctx.token.is_some()))
}

/// Require every listed scope
pub fn require_scopes<I, S>(scopes: I) -> AuthCheck
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let required: Vec<String> = scopes.into_iter().map(Into::into).collect();
    AuthCheck::new(format!("require_scopes({})", required.join(",")), move |ctx| {
        Ok(match ctx.token {
            Some(token) => required.iter().all(|s| token.has_scope(s)),
            None => false,
        })
    })
}

/// Require `scopes` only for components tagged with `tag`
pub fn restrict_tag<I, S>(tag: impl Into<String>, scopes: I) -> AuthCheck
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tag = tag.into();
    let required: Vec<String> = scopes.into_iter().map(Into::into).collect();
    AuthCheck::new(format!("restrict_tag({})", tag), move |ctx| {
        if !ctx.component.meta().tags.contains(&tag) {
            return Ok(true);
        }
        Ok(match ctx.token {
            Some(token) => required.iter().all(|s| token.has_scope(s)),
            None => false,
        })
    })
}

/// Why a component was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// A check returned false
    Refused { check: String },
    /// A check raised an explicit denial
    Denied(String),
    /// A check failed unexpectedly
    Unexpected { check: String, cause: String },
}

/// Outcome of running a list of checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny(DenyReason),
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert into the error surfaced for a call, read or get.
    ///
    /// A check that failed unexpectedly maps exactly like one that returned
    /// false.
    pub fn into_result(
        self,
        kind: ComponentKind,
        key: &str,
        authenticated: bool,
    ) -> Result<(), McpError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(DenyReason::Denied(message)) => Err(McpError::AuthorizationDenied(message)),
            Self::Deny(DenyReason::Refused { .. } | DenyReason::Unexpected { .. })
                if !authenticated =>
            {
                Err(McpError::AuthenticationRequired(format!(
                    "Authentication required for {} '{}'",
                    kind, key
                )))
            }
            Self::Deny(_) => Err(McpError::AuthorizationDenied(format!(
                "Authorization failed for {} '{}': insufficient permissions",
                kind, key
            ))),
        }
    }
}

/// Run checks in order, stopping at the first that does not allow
pub fn run_auth_checks(checks: &[AuthCheck], ctx: &AuthContext<'_>) -> AuthDecision {
    for check in checks {
        match check.evaluate(ctx) {
            Ok(true) => continue,
            Ok(false) => {
                return AuthDecision::Deny(DenyReason::Refused {
                    check: check.name().to_string(),
                })
            }
            Err(CheckError::Denied(message)) => {
                return AuthDecision::Deny(DenyReason::Denied(message));
            }
            Err(CheckError::Unexpected(cause)) => {
                tracing::warn!(
                    check = %check.name(),
                    component = %ctx.component.key(),
                    error = %cause,
                    "Auth check failed unexpectedly, denying"
                );
                return AuthDecision::Deny(DenyReason::Unexpected {
                    check: check.name().to_string(),
                    cause,
                });
            }
        }
    }
    AuthDecision::Allow
}
