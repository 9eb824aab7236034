//! MCP server: JSON-RPC routing over the dispatch pipeline
//!
//! [`McpServer::handle_request`] is the transport-agnostic entry point: a
//! transport decodes one JSON-RPC request, hands it over together with the
//! [`Session`] it arrived on, and writes back the returned response.
//!
//! Catalog requests run through the middleware chain into a terminal
//! endpoint that resolves components through the transform chain and the
//! registry, applies per-component auth, and either completes the call or
//! forks it into the [`TaskEngine`].

use crate::auth::{run_auth_checks, AccessToken, AuthContext};
use crate::config::ServerConfig;
use crate::context::{Catalog, DispatchContext, Reply, Request, Transport};
use crate::error::{McpError, Result};
use crate::lifecycle::{LifecycleHook, Lifecycle, LifespanState};
use crate::middleware::{Endpoint, Middleware, MiddlewareChain};
use crate::protocol::{
    methods, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListChangedCapability, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, ServerCapabilities, ServerInfo, TaskRequest, TasksCapability, ToolResult,
    PROTOCOL_VERSION,
};
use crate::provider::Provider;
use crate::registry::{match_template, ComponentRegistry};
use crate::task::engine::attach_related_task;
use crate::task::{ExecutionBackend, MemoryBackend, NotificationSink, Submission, TaskEngine, Work};
use crate::transform::{Transform, TransformChain};
use crate::types::{
    AnyComponent, Component, ComponentKind, Prompt, Resource, ResourceTemplate, TaskMode, Tool,
    ToolContext,
};
use crate::version::dedupe_latest;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One client connection as seen by the server
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub transport: Transport,
    pub token: Option<AccessToken>,
    /// Push channel for task status notifications
    pub notifier: Option<Arc<dyn NotificationSink>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transport: Transport::default(),
            token: None,
            notifier: None,
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

struct ServerInner {
    config: ServerConfig,
    registry: ComponentRegistry,
    middleware: MiddlewareChain,
    transforms: TransformChain,
    tasks: TaskEngine,
    lifecycle: Lifecycle,
    lifespan: Mutex<Option<LifespanState>>,
}

/// MCP server handle; cheap to clone
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

/// Builder for [`McpServer`]
pub struct McpServerBuilder {
    config: ServerConfig,
    middleware: MiddlewareChain,
    transforms: TransformChain,
    providers: Vec<Arc<dyn Provider>>,
    backend: Option<Arc<dyn ExecutionBackend>>,
    lifecycle: Lifecycle,
}

impl McpServerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: ServerConfig {
                name: name.into(),
                ..ServerConfig::default()
            },
            middleware: MiddlewareChain::new(),
            transforms: TransformChain::new(),
            providers: Vec::new(),
            backend: None,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Replace the whole configuration, name included
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    pub fn mask_error_details(mut self, mask: bool) -> Self {
        self.config.mask_error_details = mask;
        self
    }

    /// Add a middleware layer; earlier layers wrap later ones
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Add a transform; earlier transforms are further out
    pub fn transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Execution backend for background tasks (default: in-process)
    pub fn backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn hook(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.lifecycle.push(Arc::new(hook));
        self
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle.extend(lifecycle);
        self
    }

    pub fn build(self) -> Result<McpServer> {
        let registry = ComponentRegistry::new();
        for provider in self.providers {
            registry.add_provider(provider)?;
        }
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let tasks = TaskEngine::new(backend, self.config.tasks.clone());

        tracing::info!(
            server = %self.config.name,
            middleware = self.middleware.len(),
            transforms = self.transforms.len(),
            backend = %tasks.backend().name(),
            "MCP server created"
        );

        Ok(McpServer {
            inner: Arc::new(ServerInner {
                config: self.config,
                registry,
                middleware: self.middleware,
                transforms: self.transforms,
                tasks,
                lifecycle: self.lifecycle,
                lifespan: Mutex::new(None),
            }),
        })
    }
}

impl McpServer {
    pub fn builder(name: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.inner.registry
    }

    pub fn tasks(&self) -> &TaskEngine {
        &self.inner.tasks
    }

    pub fn add_tool(&self, tool: Tool) -> Result<()> {
        self.inner.registry.add_tool(tool)
    }

    pub fn add_resource(&self, resource: Resource) -> Result<()> {
        self.inner.registry.add_resource(resource)
    }

    pub fn add_template(&self, template: ResourceTemplate) -> Result<()> {
        self.inner.registry.add_template(template)
    }

    pub fn add_prompt(&self, prompt: Prompt) -> Result<()> {
        self.inner.registry.add_prompt(prompt)
    }

    /// Run lifecycle setup. Starting twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut lifespan = self.inner.lifespan.lock().await;
        if lifespan.is_some() {
            return Ok(());
        }
        let state = self.inner.lifecycle.start().await?;
        tracing::info!(
            server = %self.name(),
            hooks = self.inner.lifecycle.len(),
            "MCP server started"
        );
        *lifespan = Some(state);
        Ok(())
    }

    /// Run lifecycle teardown if the server was started
    pub async fn shutdown(&self) {
        let Some(state) = self.inner.lifespan.lock().await.take() else {
            return;
        };
        self.inner.lifecycle.shutdown(&state).await;
        tracing::info!(server = %self.name(), "MCP server stopped");
    }

    /// Values published by lifecycle hooks, while the server is running
    pub async fn lifespan_state(&self) -> Option<LifespanState> {
        self.inner.lifespan.lock().await.clone()
    }

    /// Forget everything a closed session left behind
    pub async fn close_session(&self, session_id: &str) {
        self.inner.tasks.close_session(session_id).await;
    }

    /// Handle one JSON-RPC request from `session`
    pub async fn handle_request(&self, session: &Session, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let method = request.method.clone();
        let params = request.params.unwrap_or_else(|| json!({}));

        match self.route(session, &method, params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                if e.is_internal() {
                    tracing::warn!(method = %method, session = %session.id, error = %e, "Request failed");
                } else {
                    tracing::debug!(method = %method, session = %session.id, error = %e, "Request rejected");
                }
                let e = e.masked(self.inner.config.mask_error_details);
                JsonRpcResponse::failure(id, JsonRpcError::from(&e))
            }
        }
    }

    async fn route(&self, session: &Session, method: &str, params: Value) -> Result<Value> {
        match method {
            methods::INITIALIZE => Ok(serde_json::to_value(self.initialize_result())?),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => {
                let tools = self.run(session, Request::ListTools, params).await?;
                let tools = match tools {
                    Reply::Tools(tools) => tools,
                    other => return Err(unexpected(method, &other)),
                };
                Ok(serde_json::to_value(ListToolsResult {
                    tools: tools.iter().map(Tool::to_wire).collect(),
                })?)
            }
            methods::TOOLS_CALL => {
                let name = required_str(&params, "name")?;
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let request = Request::CallTool { name, arguments };
                match self.run(session, request, params).await {
                    Ok(Reply::ToolResult(result)) => Ok(serde_json::to_value(result)?),
                    Ok(Reply::Task(info)) => Ok(json!({ "task": info })),
                    Ok(other) => Err(unexpected(method, &other)),
                    Err(e) => {
                        let mask = self.inner.config.mask_error_details;
                        Ok(serde_json::to_value(in_band(e, mask, &session.id)?)?)
                    }
                }
            }
            methods::RESOURCES_LIST => match self.run(session, Request::ListResources, params).await? {
                Reply::Resources(resources) => Ok(serde_json::to_value(ListResourcesResult {
                    resources: resources.iter().map(Resource::to_wire).collect(),
                })?),
                other => Err(unexpected(method, &other)),
            },
            methods::RESOURCE_TEMPLATES_LIST => {
                match self.run(session, Request::ListResourceTemplates, params).await? {
                    Reply::ResourceTemplates(templates) => {
                        Ok(serde_json::to_value(ListResourceTemplatesResult {
                            resource_templates: templates.iter().map(ResourceTemplate::to_wire).collect(),
                        })?)
                    }
                    other => Err(unexpected(method, &other)),
                }
            }
            methods::RESOURCES_READ => {
                let uri = required_str(&params, "uri")?;
                match self.run(session, Request::ReadResource { uri }, params).await? {
                    Reply::Resource(result) => Ok(serde_json::to_value(result)?),
                    Reply::Task(info) => Ok(json!({ "task": info })),
                    other => Err(unexpected(method, &other)),
                }
            }
            methods::PROMPTS_LIST => match self.run(session, Request::ListPrompts, params).await? {
                Reply::Prompts(prompts) => Ok(serde_json::to_value(ListPromptsResult {
                    prompts: prompts.iter().map(Prompt::to_wire).collect(),
                })?),
                other => Err(unexpected(method, &other)),
            },
            methods::PROMPTS_GET => {
                let name = required_str(&params, "name")?;
                let arguments = prompt_arguments(&params)?;
                match self.run(session, Request::GetPrompt { name, arguments }, params).await? {
                    Reply::Prompt(result) => Ok(serde_json::to_value(result)?),
                    Reply::Task(info) => Ok(json!({ "task": info })),
                    other => Err(unexpected(method, &other)),
                }
            }
            methods::TASKS_GET => {
                let task_id = required_str(&params, "taskId")?;
                Ok(serde_json::to_value(self.inner.tasks.status(&session.id, &task_id).await?)?)
            }
            methods::TASKS_RESULT => {
                let task_id = required_str(&params, "taskId")?;
                let mut value = self.inner.tasks.result(&session.id, &task_id).await?;
                attach_related_task(&mut value, &task_id);
                Ok(value)
            }
            methods::TASKS_LIST => {
                let cursor = params.get("cursor").and_then(Value::as_str);
                let limit = params
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map(|l| usize::try_from(l).unwrap_or(usize::MAX));
                Ok(serde_json::to_value(
                    self.inner.tasks.list(&session.id, cursor, limit).await?,
                )?)
            }
            methods::TASKS_CANCEL => {
                let task_id = required_str(&params, "taskId")?;
                Ok(serde_json::to_value(self.inner.tasks.cancel(&session.id, &task_id).await?)?)
            }
            methods::TASKS_DELETE => {
                let task_id = required_str(&params, "taskId")?;
                Ok(serde_json::to_value(self.inner.tasks.delete(&session.id, &task_id).await?)?)
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize_result(&self) -> InitializeResult {
        let config = &self.inner.config;
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ListChangedCapability::default()),
                resources: Some(ListChangedCapability::default()),
                prompts: Some(ListChangedCapability::default()),
                tasks: Some(TasksCapability {
                    list: true,
                    cancel: true,
                }),
            },
            server_info: ServerInfo {
                name: config.name.clone(),
                version: config.version.clone(),
            },
            instructions: config.instructions.clone(),
        }
    }

    async fn run(&self, session: &Session, request: Request, params: Value) -> Result<Reply> {
        let task = match request.target() {
            Some(_) => TaskRequest::from_params(&params),
            None => None,
        };
        let ctx = DispatchContext::new(&session.id, request)
            .with_message(params)
            .with_transport(session.transport)
            .with_token(session.token.clone())
            .with_task(task)
            .with_catalog(Arc::new(self.clone()));
        self.dispatch(ctx, session.notifier.clone()).await
    }

    async fn dispatch(
        &self,
        mut ctx: DispatchContext,
        notifier: Option<Arc<dyn NotificationSink>>,
    ) -> Result<Reply> {
        let endpoint = Terminal {
            server: self,
            notifier,
        };
        self.inner.middleware.dispatch(&mut ctx, &endpoint).await
    }
}

fn required_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| McpError::Validation(format!("Missing required parameter: {}", key)))
}

fn prompt_arguments(params: &Value) -> Result<HashMap<String, String>> {
    match params.get("arguments") {
        None | Some(Value::Null) => Ok(HashMap::new()),
        Some(arguments) => serde_json::from_value(arguments.clone())
            .map_err(|e| McpError::Validation(format!("Invalid prompt arguments: {}", e))),
    }
}

/// Execution failures become an `isError` tool result; anything else stays
/// a protocol error.
fn in_band(error: McpError, mask: bool, session_id: &str) -> Result<ToolResult> {
    if !(matches!(error, McpError::ToolExecution(_)) || error.is_internal()) {
        return Err(error);
    }
    if error.is_internal() {
        tracing::warn!(session = %session_id, error = %error, "Tool call failed");
    }
    Ok(ToolResult::error(error.masked(mask).to_string()))
}

fn unexpected(method: &str, reply: &Reply) -> McpError {
    McpError::Internal(format!("unexpected {} reply for {}", reply.variant(), method))
}

/// Per-component auth, same rules as the auth middleware
fn authorize(ctx: &DispatchContext, component: &dyn Component) -> Result<()> {
    let checks = &component.meta().auth;
    if checks.is_empty() || ctx.transport == Transport::Stdio {
        return Ok(());
    }
    run_auth_checks(checks, &AuthContext::new(ctx.token.as_ref(), component)).into_result(
        component.kind(),
        component.key(),
        ctx.token.is_some(),
    )
}

fn visible<T: Component>(ctx: &DispatchContext, items: Vec<T>) -> Vec<T> {
    dedupe_latest(items)
        .into_iter()
        .filter(|item| authorize(ctx, item).is_ok())
        .collect()
}

/// Innermost handler: transforms, registry, execution
struct Terminal<'a> {
    server: &'a McpServer,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl<'a> Terminal<'a> {
    fn registry(&self) -> &ComponentRegistry {
        &self.server.inner.registry
    }

    fn transforms(&self) -> &TransformChain {
        &self.server.inner.transforms
    }

    async fn fork<T, F>(
        &self,
        ctx: &DispatchContext,
        task: TaskRequest,
        kind: ComponentKind,
        key: &str,
        mode: TaskMode,
        work: F,
    ) -> Result<Reply>
    where
        T: Serialize + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let work: Work = Box::pin(async move {
            let output = work.await?;
            Ok::<_, McpError>(serde_json::to_value(output)?)
        });
        let submission = Submission::new(&ctx.session_id, task, kind, key, mode, work)
            .with_notifier(self.notifier.clone());
        Ok(Reply::Task(self.server.inner.tasks.submit(submission).await?))
    }

    async fn call_tool(&self, ctx: &DispatchContext, name: &str, arguments: Value) -> Result<Reply> {
        let tool = self
            .transforms()
            .next(self.registry())
            .get_tool(ctx, name, None)
            .await?
            .ok_or_else(|| McpError::NotFound(format!("tool '{}'", name)))?;
        authorize(ctx, &tool)?;
        let mode = tool.meta.task_mode;
        TaskEngine::check_mode(mode, ctx.task.is_some(), ComponentKind::Tool, name)?;

        let tool_ctx = ToolContext::new(ctx.clone());
        match ctx.task.clone() {
            Some(task) => {
                tool.validate_arguments(&arguments)?;
                let invoked = tool.invoke(arguments, tool_ctx);
                if mode.supports_tasks() {
                    return self.fork(ctx, task, ComponentKind::Tool, name, mode, invoked).await;
                }
                // Runs inline, so the task result must match a direct call.
                let mask = self.server.inner.config.mask_error_details;
                let session_id = ctx.session_id.clone();
                let work = async move { invoked.await.or_else(|e| in_band(e, mask, &session_id)) };
                self.fork(ctx, task, ComponentKind::Tool, name, mode, work).await
            }
            None => Ok(Reply::ToolResult(tool.run(arguments, tool_ctx).await?)),
        }
    }

    async fn read_resource(&self, ctx: &DispatchContext, uri: &str) -> Result<Reply> {
        let next = self.transforms().next(self.registry());
        if let Some(resource) = next.get_resource(ctx, uri, None).await? {
            authorize(ctx, &resource)?;
            let mode = resource.meta.task_mode;
            TaskEngine::check_mode(mode, ctx.task.is_some(), ComponentKind::Resource, uri)?;
            return match ctx.task.clone() {
                Some(task) => {
                    let work = resource.invoke();
                    self.fork(ctx, task, ComponentKind::Resource, uri, mode, work).await
                }
                None => Ok(Reply::Resource(resource.read().await?)),
            };
        }

        let templates = self
            .transforms()
            .list_resource_templates(ctx, self.registry())
            .await?;
        let (template, params) = match_template(templates, uri)
            .ok_or_else(|| McpError::NotFound(format!("resource '{}'", uri)))?;
        authorize(ctx, &template)?;
        let mode = template.meta.task_mode;
        TaskEngine::check_mode(mode, ctx.task.is_some(), ComponentKind::Template, uri)?;
        tracing::debug!(uri = %uri, template = %template.uri_template, "Resource served by template");
        match ctx.task.clone() {
            Some(task) => {
                let work = template.invoke(params);
                self.fork(ctx, task, ComponentKind::Template, uri, mode, work).await
            }
            None => Ok(Reply::Resource(template.read(params).await?)),
        }
    }

    async fn get_prompt(
        &self,
        ctx: &DispatchContext,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<Reply> {
        let prompt = self
            .transforms()
            .next(self.registry())
            .get_prompt(ctx, name, None)
            .await?
            .ok_or_else(|| McpError::NotFound(format!("prompt '{}'", name)))?;
        authorize(ctx, &prompt)?;
        let mode = prompt.meta.task_mode;
        TaskEngine::check_mode(mode, ctx.task.is_some(), ComponentKind::Prompt, name)?;

        match ctx.task.clone() {
            Some(task) => {
                prompt.validate(&arguments)?;
                let work = prompt.invoke(arguments);
                self.fork(ctx, task, ComponentKind::Prompt, name, mode, work).await
            }
            None => Ok(Reply::Prompt(prompt.render(arguments).await?)),
        }
    }
}

#[async_trait]
impl<'a> Endpoint for Terminal<'a> {
    async fn call(&self, ctx: &mut DispatchContext) -> Result<Reply> {
        let ctx: &DispatchContext = ctx;
        let registry = self.registry();
        let transforms = self.transforms();
        match &ctx.request {
            Request::ListTools => {
                let tools = transforms.list_tools(ctx, registry).await?;
                Ok(Reply::Tools(visible(ctx, tools)))
            }
            Request::ListResources => {
                let resources = transforms.list_resources(ctx, registry).await?;
                Ok(Reply::Resources(visible(ctx, resources)))
            }
            Request::ListResourceTemplates => {
                let templates = transforms.list_resource_templates(ctx, registry).await?;
                Ok(Reply::ResourceTemplates(visible(ctx, templates)))
            }
            Request::ListPrompts => {
                let prompts = transforms.list_prompts(ctx, registry).await?;
                Ok(Reply::Prompts(visible(ctx, prompts)))
            }
            Request::CallTool { name, arguments } => {
                self.call_tool(ctx, name, arguments.clone()).await
            }
            Request::ReadResource { uri } => self.read_resource(ctx, uri).await,
            Request::GetPrompt { name, arguments } => {
                self.get_prompt(ctx, name, arguments.clone()).await
            }
        }
    }
}

#[async_trait]
impl Catalog for McpServer {
    async fn list_tools(&self, ctx: &DispatchContext) -> Result<Vec<Tool>> {
        let mut listing = ctx.nested(Request::ListTools);
        listing.bypass_search = ctx.bypass_search;
        self.dispatch(listing, None).await?.into_tools()
    }

    async fn call_tool(
        &self,
        ctx: &DispatchContext,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResult> {
        let call = ctx.nested(Request::CallTool {
            name: name.to_string(),
            arguments,
        });
        self.dispatch(call, None).await?.into_tool_result()
    }

    async fn resolve(
        &self,
        ctx: &DispatchContext,
        kind: ComponentKind,
        key: &str,
    ) -> Result<Option<AnyComponent>> {
        let next = self.inner.transforms.next(&self.inner.registry);
        match kind {
            ComponentKind::Tool => Ok(next.get_tool(ctx, key, None).await?.map(AnyComponent::Tool)),
            ComponentKind::Resource => {
                if let Some(resource) = next.get_resource(ctx, key, None).await? {
                    return Ok(Some(AnyComponent::Resource(resource)));
                }
                let templates = self
                    .inner
                    .transforms
                    .list_resource_templates(ctx, &self.inner.registry)
                    .await?;
                Ok(match_template(templates, key).map(|(t, _)| AnyComponent::Template(t)))
            }
            ComponentKind::Template => Ok(next
                .get_resource_template(ctx, key, None)
                .await?
                .map(AnyComponent::Template)),
            ComponentKind::Prompt => {
                Ok(next.get_prompt(ctx, key, None).await?.map(AnyComponent::Prompt))
            }
        }
    }
}
