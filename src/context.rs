//! Per-request dispatch context
//!
//! A [`DispatchContext`] travels through the middleware chain, the transform
//! chain and into component handlers. It carries the decoded request, the
//! session identity, the resolved access token and a scratch map for values
//! middleware wants to hand to later stages.

use crate::auth::AccessToken;
use crate::error::{McpError, Result};
use crate::protocol::{methods, PromptResult, ResourceResult, TaskInfo, TaskRequest, ToolResult};
use crate::types::{AnyComponent, ComponentKind, Prompt, Resource, ResourceTemplate, Tool};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Operation class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Call,
    Read,
    Get,
}

/// Transport the session arrived on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Transport {
    Stdio,
    Http,
    Sse,
    #[default]
    InProcess,
}

/// Decoded catalog request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ListTools,
    CallTool { name: String, arguments: Value },
    ListResources,
    ReadResource { uri: String },
    ListResourceTemplates,
    ListPrompts,
    GetPrompt { name: String, arguments: HashMap<String, String> },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Self::ListTools
            | Self::ListResources
            | Self::ListResourceTemplates
            | Self::ListPrompts => Operation::List,
            Self::CallTool { .. } => Operation::Call,
            Self::ReadResource { .. } => Operation::Read,
            Self::GetPrompt { .. } => Operation::Get,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::ListTools => methods::TOOLS_LIST,
            Self::CallTool { .. } => methods::TOOLS_CALL,
            Self::ListResources => methods::RESOURCES_LIST,
            Self::ReadResource { .. } => methods::RESOURCES_READ,
            Self::ListResourceTemplates => methods::RESOURCE_TEMPLATES_LIST,
            Self::ListPrompts => methods::PROMPTS_LIST,
            Self::GetPrompt { .. } => methods::PROMPTS_GET,
        }
    }

    /// Component addressed by a call, read or get
    pub fn target(&self) -> Option<(ComponentKind, &str)> {
        match self {
            Self::CallTool { name, .. } => Some((ComponentKind::Tool, name)),
            Self::ReadResource { uri } => Some((ComponentKind::Resource, uri)),
            Self::GetPrompt { name, .. } => Some((ComponentKind::Prompt, name)),
            _ => None,
        }
    }
}

/// Typed result travelling back out through the middleware chain
#[derive(Debug, Clone)]
pub enum Reply {
    Tools(Vec<Tool>),
    Resources(Vec<Resource>),
    ResourceTemplates(Vec<ResourceTemplate>),
    Prompts(Vec<Prompt>),
    ToolResult(ToolResult),
    Resource(ResourceResult),
    Prompt(PromptResult),
    /// Call accepted for background execution
    Task(TaskInfo),
}

impl Reply {
    pub fn into_tools(self) -> Result<Vec<Tool>> {
        match self {
            Self::Tools(tools) => Ok(tools),
            other => Err(unexpected_reply("tools", &other)),
        }
    }

    pub fn into_tool_result(self) -> Result<ToolResult> {
        match self {
            Self::ToolResult(result) => Ok(result),
            other => Err(unexpected_reply("tool result", &other)),
        }
    }

    /// Short name of the reply variant
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Tools(_) => "tools",
            Self::Resources(_) => "resources",
            Self::ResourceTemplates(_) => "resource templates",
            Self::Prompts(_) => "prompts",
            Self::ToolResult(_) => "tool result",
            Self::Resource(_) => "resource",
            Self::Prompt(_) => "prompt",
            Self::Task(_) => "task",
        }
    }
}

fn unexpected_reply(expected: &str, got: &Reply) -> McpError {
    McpError::Internal(format!("expected {} reply, got {}", expected, got.variant()))
}

/// Server-side catalog access for re-entrant calls
///
/// Implemented by the server. Handlers reach it through the dispatch context
/// rather than through ambient state.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// List tools through the full pipeline
    async fn list_tools(&self, ctx: &DispatchContext) -> Result<Vec<Tool>>;

    /// Call a tool through the full pipeline
    async fn call_tool(&self, ctx: &DispatchContext, name: &str, arguments: Value)
        -> Result<ToolResult>;

    /// Resolve a component through transforms and registry, without middleware
    async fn resolve(
        &self,
        ctx: &DispatchContext,
        kind: ComponentKind,
        key: &str,
    ) -> Result<Option<AnyComponent>>;
}

/// Per-request state
#[derive(Clone)]
pub struct DispatchContext {
    pub request: Request,
    /// Raw request params
    pub message: Value,
    pub session_id: String,
    pub transport: Transport,
    pub token: Option<AccessToken>,
    pub scratch: HashMap<String, Value>,
    /// Skip catalog-replacing transforms for this one listing
    pub bypass_search: bool,
    /// Run-as-task request, if the caller asked for one
    pub task: Option<TaskRequest>,
    pub catalog: Option<Arc<dyn Catalog>>,
}

impl DispatchContext {
    pub fn new(session_id: impl Into<String>, request: Request) -> Self {
        Self {
            request,
            message: Value::Null,
            session_id: session_id.into(),
            transport: Transport::default(),
            token: None,
            scratch: HashMap::new(),
            bypass_search: false,
            task: None,
            catalog: None,
        }
    }

    pub fn with_message(mut self, message: Value) -> Self {
        self.message = message;
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_token(mut self, token: Option<AccessToken>) -> Self {
        self.token = token;
        self
    }

    pub fn with_task(mut self, task: Option<TaskRequest>) -> Self {
        self.task = task;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn operation(&self) -> Operation {
        self.request.operation()
    }

    pub fn method(&self) -> &'static str {
        self.request.method()
    }

    /// Context for a nested request issued on behalf of this one.
    ///
    /// Keeps session, transport, token, catalog and scratch; resets the
    /// bypass flag and any task request.
    pub fn nested(&self, request: Request) -> Self {
        Self {
            request,
            message: Value::Null,
            session_id: self.session_id.clone(),
            transport: self.transport,
            token: self.token.clone(),
            scratch: self.scratch.clone(),
            bypass_search: false,
            task: None,
            catalog: self.catalog.clone(),
        }
    }

    /// Nested tool listing that sees the catalog behind search transforms
    pub fn unfiltered_listing(&self) -> Self {
        let mut ctx = self.nested(Request::ListTools);
        ctx.bypass_search = true;
        ctx
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("method", &self.method())
            .field("session_id", &self.session_id)
            .field("transport", &self.transport)
            .field("authenticated", &self.token.is_some())
            .field("bypass_search", &self.bypass_search)
            .field("task", &self.task)
            .finish()
    }
}
