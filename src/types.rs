//! Catalog component types
//!
//! Tools, resources, resource templates and prompts, each carrying a
//! [`ComponentMeta`] and an async handler.

use crate::auth::AuthCheck;
use crate::context::DispatchContext;
use crate::error::{McpError, Result};
use crate::protocol::{
    McpPrompt, McpResource, McpResourceTemplate, McpTool, PromptArgument, PromptResult,
    ResourceResult, ToolResult,
};
use crate::version::Versioned;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Component category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Tool,
    Resource,
    Template,
    Prompt,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Template => "template",
            Self::Prompt => "prompt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool" => Some(Self::Tool),
            "resource" => Some(Self::Resource),
            "template" => Some(Self::Template),
            "prompt" => Some(Self::Prompt),
            _ => None,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a component may run as a background task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// Synchronous only; task requests degrade to inline execution
    #[default]
    Forbidden,
    /// Either way, caller decides
    Optional,
    /// Must be called as a task
    Required,
}

impl TaskMode {
    pub fn supports_tasks(&self) -> bool {
        !matches!(self, Self::Forbidden)
    }
}

/// Behavioural hints shown to clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Annotations {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn read_only() -> Self {
        Self {
            read_only_hint: Some(true),
            ..Default::default()
        }
    }
}

/// Metadata shared by every component kind
#[derive(Debug, Clone)]
pub struct ComponentMeta {
    pub version: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub enabled: bool,
    pub annotations: Annotations,
    /// Checks evaluated with AND semantics before the component is shown or run
    pub auth: Vec<AuthCheck>,
    pub task_mode: TaskMode,
}

impl Default for ComponentMeta {
    fn default() -> Self {
        Self {
            version: None,
            title: None,
            description: None,
            tags: BTreeSet::new(),
            enabled: true,
            annotations: Annotations::default(),
            auth: Vec::new(),
            task_mode: TaskMode::default(),
        }
    }
}

/// Common view over all component kinds
pub trait Component: Versioned + Send + Sync {
    fn kind(&self) -> ComponentKind;
    fn meta(&self) -> &ComponentMeta;
    fn meta_mut(&mut self) -> &mut ComponentMeta;
}

/// Builder methods for any component's metadata
pub trait WithMeta: Component + Sized {
    fn with_version(mut self, version: impl Into<String>) -> Self {
        self.meta_mut().version = Some(version.into());
        self
    }

    fn with_description(mut self, description: impl Into<String>) -> Self {
        self.meta_mut().description = Some(description.into());
        self
    }

    fn with_title(mut self, title: impl Into<String>) -> Self {
        self.meta_mut().title = Some(title.into());
        self
    }

    fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta_mut().tags.extend(tags.into_iter().map(Into::into));
        self
    }

    fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.meta_mut().annotations = annotations;
        self
    }

    fn with_auth(mut self, check: AuthCheck) -> Self {
        self.meta_mut().auth.push(check);
        self
    }

    fn with_task_mode(mut self, mode: TaskMode) -> Self {
        self.meta_mut().task_mode = mode;
        self
    }

    fn disabled(mut self) -> Self {
        self.meta_mut().enabled = false;
        self
    }
}

impl<T: Component + Sized> WithMeta for T {}

// ============================================================================
// Tools
// ============================================================================

/// Execution context handed to tool handlers
#[derive(Clone)]
pub struct ToolContext {
    dispatch: DispatchContext,
}

impl ToolContext {
    pub fn new(dispatch: DispatchContext) -> Self {
        Self { dispatch }
    }

    pub fn dispatch(&self) -> &DispatchContext {
        &self.dispatch
    }

    pub fn session_id(&self) -> &str {
        &self.dispatch.session_id
    }
}

pub type ToolHandler =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync>;

/// A callable tool
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
    pub output_schema: Option<Value>,
    pub meta: ComponentMeta,
    handler: ToolHandler,
}

impl Tool {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            parameters: json!({"type": "object", "properties": {}}),
            output_schema: None,
            meta: ComponentMeta::default(),
            handler: Arc::new(
                move |args: Value, ctx: ToolContext| -> BoxFuture<'static, Result<ToolResult>> {
                    Box::pin(handler(args, ctx))
                },
            ),
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Check arguments against the top level of `parameters`: an object
    /// schema needs an object carrying every `required` key, and declared
    /// property types must match. Nested schemas are left to the handler.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<()> {
        let schema = &self.parameters;
        let expects_object = match schema.get("type") {
            Some(declared) => declared == "object",
            None => schema.get("properties").is_some() || schema.get("required").is_some(),
        };
        if !expects_object {
            return Ok(());
        }
        let invalid = |detail: String| {
            McpError::Validation(format!("Invalid arguments for tool '{}': {}", self.name, detail))
        };
        let Some(provided) = arguments.as_object() else {
            return Err(invalid(format!("expected an object, got {}", json_type(arguments))));
        };

        let missing: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|key| !provided.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(format!("missing required arguments: {}", missing.join(", "))));
        }

        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };
        for (key, value) in provided {
            let Some(declared) = properties.get(key).and_then(|p| p.get("type")) else {
                continue;
            };
            let accepted = match declared {
                Value::String(t) => matches_type(t, value),
                Value::Array(types) => types
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|t| matches_type(t, value)),
                _ => true,
            };
            if !accepted {
                return Err(invalid(format!(
                    "argument '{}' should be {}, got {}",
                    key,
                    declared,
                    json_type(value)
                )));
            }
        }
        Ok(())
    }

    pub async fn run(&self, arguments: Value, ctx: ToolContext) -> Result<ToolResult> {
        self.validate_arguments(&arguments)?;
        (self.handler)(arguments, ctx).await
    }

    /// Detached future for background execution. Arguments are not
    /// validated here; call `validate_arguments` first.
    pub fn invoke(&self, arguments: Value, ctx: ToolContext) -> BoxFuture<'static, Result<ToolResult>> {
        (self.handler)(arguments, ctx)
    }

    pub fn to_wire(&self) -> McpTool {
        McpTool {
            name: self.name.clone(),
            title: self.meta.title.clone(),
            description: self.meta.description.clone(),
            input_schema: self.parameters.clone(),
            output_schema: self.output_schema.clone(),
            annotations: if self.meta.annotations.is_empty() {
                None
            } else {
                serde_json::to_value(&self.meta.annotations).ok()
            },
            meta: wire_meta(&self.meta),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Unknown type names are accepted
fn matches_type(declared: &str, value: &Value) -> bool {
    match declared {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "string" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("version", &self.meta.version)
            .field("enabled", &self.meta.enabled)
            .finish()
    }
}

impl Versioned for Tool {
    fn key(&self) -> &str {
        &self.name
    }
    fn version(&self) -> Option<&str> {
        self.meta.version.as_deref()
    }
}

impl Component for Tool {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Tool
    }
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ComponentMeta {
        &mut self.meta
    }
}

fn wire_meta(meta: &ComponentMeta) -> Option<Value> {
    if meta.version.is_none() && meta.tags.is_empty() {
        return None;
    }
    let mut out = Map::new();
    if let Some(v) = &meta.version {
        out.insert("version".to_string(), json!(v));
    }
    if !meta.tags.is_empty() {
        out.insert("tags".to_string(), json!(meta.tags));
    }
    Some(Value::Object(out))
}

// ============================================================================
// Resources
// ============================================================================

pub type ResourceReader = Arc<dyn Fn() -> BoxFuture<'static, Result<ResourceResult>> + Send + Sync>;

/// A readable resource at a fixed URI
#[derive(Clone)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub meta: ComponentMeta,
    reader: ResourceReader,
}

impl Resource {
    pub fn new<F, Fut>(uri: impl Into<String>, name: impl Into<String>, reader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResourceResult>> + Send + 'static,
    {
        Self {
            uri: uri.into(),
            name: name.into(),
            mime_type: None,
            meta: ComponentMeta::default(),
            reader: Arc::new(move || -> BoxFuture<'static, Result<ResourceResult>> {
                Box::pin(reader())
            }),
        }
    }

    /// Resource with fixed text content
    pub fn text(uri: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        let uri = uri.into();
        let text = text.into();
        let reply_uri = uri.clone();
        Self::new(uri, name, move || {
            let result = ResourceResult::text(reply_uri.clone(), Some("text/plain"), text.clone());
            async move { Ok(result) }
        })
        .with_mime_type("text/plain")
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub async fn read(&self) -> Result<ResourceResult> {
        (self.reader)().await
    }

    pub fn invoke(&self) -> BoxFuture<'static, Result<ResourceResult>> {
        (self.reader)()
    }

    pub fn to_wire(&self) -> McpResource {
        McpResource {
            uri: self.uri.clone(),
            name: self.name.clone(),
            description: self.meta.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("uri", &self.uri)
            .field("version", &self.meta.version)
            .finish()
    }
}

impl Versioned for Resource {
    fn key(&self) -> &str {
        &self.uri
    }
    fn version(&self) -> Option<&str> {
        self.meta.version.as_deref()
    }
}

impl Component for Resource {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Resource
    }
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ComponentMeta {
        &mut self.meta
    }
}

// ============================================================================
// Resource templates
// ============================================================================

pub type TemplateReader = Arc<
    dyn Fn(HashMap<String, String>) -> BoxFuture<'static, Result<ResourceResult>> + Send + Sync,
>;

/// A family of resources addressed by a URI template such as `weather://{city}/current`
#[derive(Clone)]
pub struct ResourceTemplate {
    pub uri_template: String,
    pub name: String,
    pub mime_type: Option<String>,
    /// JSON schema of the template parameters
    pub parameters: Value,
    pub meta: ComponentMeta,
    reader: TemplateReader,
}

impl ResourceTemplate {
    pub fn new<F, Fut>(uri_template: impl Into<String>, name: impl Into<String>, reader: F) -> Self
    where
        F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResourceResult>> + Send + 'static,
    {
        let uri_template = uri_template.into();
        let parameters = template_parameters(&uri_template);
        Self {
            uri_template,
            name: name.into(),
            mime_type: None,
            parameters,
            meta: ComponentMeta::default(),
            reader: Arc::new(
                move |params: HashMap<String, String>| -> BoxFuture<'static, Result<ResourceResult>> {
                    Box::pin(reader(params))
                },
            ),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Extract template parameters if `uri` belongs to this template
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        match_uri_template(uri, &self.uri_template)
    }

    pub async fn read(&self, params: HashMap<String, String>) -> Result<ResourceResult> {
        (self.reader)(params).await
    }

    pub fn invoke(&self, params: HashMap<String, String>) -> BoxFuture<'static, Result<ResourceResult>> {
        (self.reader)(params)
    }

    pub fn to_wire(&self) -> McpResourceTemplate {
        McpResourceTemplate {
            uri_template: self.uri_template.clone(),
            name: self.name.clone(),
            description: self.meta.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

impl fmt::Debug for ResourceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTemplate")
            .field("uri_template", &self.uri_template)
            .field("version", &self.meta.version)
            .finish()
    }
}

impl Versioned for ResourceTemplate {
    fn key(&self) -> &str {
        &self.uri_template
    }
    fn version(&self) -> Option<&str> {
        self.meta.version.as_deref()
    }
}

impl Component for ResourceTemplate {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Template
    }
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ComponentMeta {
        &mut self.meta
    }
}

/// Build the matcher for a URI template.
///
/// `{name}` matches a single path segment, `{name*}` matches the remainder.
/// Returns the compiled pattern and the parameter names in group order.
fn template_regex(template: &str) -> Option<(Regex, Vec<String>)> {
    let mut pattern = String::from("^");
    let mut names = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let close = open + rest[open..].find('}')?;
        pattern.push_str(&regex::escape(&rest[..open]));

        let raw = &rest[open + 1..close];
        let (name, wildcard) = match raw.strip_suffix('*') {
            Some(n) => (n, true),
            None => (raw, false),
        };
        let group = format!("p{}", names.len());
        if wildcard {
            pattern.push_str(&format!("(?P<{}>.+)", group));
        } else {
            pattern.push_str(&format!("(?P<{}>[^/]+)", group));
        }
        names.push(name.to_string());
        rest = &rest[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    Regex::new(&pattern).ok().map(|re| (re, names))
}

/// Match a URI against a template, returning percent-decoded parameters
pub fn match_uri_template(uri: &str, template: &str) -> Option<HashMap<String, String>> {
    let (re, names) = template_regex(template)?;
    let caps = re.captures(uri)?;
    let mut params = HashMap::new();
    for (i, name) in names.iter().enumerate() {
        let raw = caps.name(&format!("p{}", i))?.as_str();
        let value = urlencoding::decode(raw)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        params.insert(name.clone(), value);
    }
    Some(params)
}

fn template_parameters(template: &str) -> Value {
    let names = template_regex(template)
        .map(|(_, names)| names)
        .unwrap_or_default();
    let properties: Map<String, Value> = names
        .iter()
        .map(|n| (n.clone(), json!({"type": "string"})))
        .collect();
    json!({"type": "object", "properties": properties, "required": names})
}

// ============================================================================
// Prompts
// ============================================================================

pub type PromptRenderer = Arc<
    dyn Fn(HashMap<String, String>) -> BoxFuture<'static, Result<PromptResult>> + Send + Sync,
>;

/// A renderable prompt
#[derive(Clone)]
pub struct Prompt {
    pub name: String,
    pub arguments: Vec<PromptArgument>,
    pub meta: ComponentMeta,
    renderer: PromptRenderer,
}

impl Prompt {
    pub fn new<F, Fut>(name: impl Into<String>, renderer: F) -> Self
    where
        F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PromptResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            meta: ComponentMeta::default(),
            renderer: Arc::new(
                move |args: HashMap<String, String>| -> BoxFuture<'static, Result<PromptResult>> {
                    Box::pin(renderer(args))
                },
            ),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, required: bool) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: None,
            required,
        });
        self
    }

    /// Check required arguments are present
    pub fn validate(&self, arguments: &HashMap<String, String>) -> Result<()> {
        let missing: Vec<&str> = self
            .arguments
            .iter()
            .filter(|a| a.required && !arguments.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(McpError::Validation(format!(
                "Missing required arguments for prompt '{}': {}",
                self.name,
                missing.join(", ")
            )))
        }
    }

    pub async fn render(&self, arguments: HashMap<String, String>) -> Result<PromptResult> {
        self.validate(&arguments)?;
        (self.renderer)(arguments).await
    }

    pub fn invoke(&self, arguments: HashMap<String, String>) -> BoxFuture<'static, Result<PromptResult>> {
        (self.renderer)(arguments)
    }

    pub fn to_wire(&self) -> McpPrompt {
        McpPrompt {
            name: self.name.clone(),
            description: self.meta.description.clone(),
            arguments: if self.arguments.is_empty() {
                None
            } else {
                Some(self.arguments.clone())
            },
        }
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("name", &self.name)
            .field("version", &self.meta.version)
            .finish()
    }
}

impl Versioned for Prompt {
    fn key(&self) -> &str {
        &self.name
    }
    fn version(&self) -> Option<&str> {
        self.meta.version.as_deref()
    }
}

impl Component for Prompt {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Prompt
    }
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ComponentMeta {
        &mut self.meta
    }
}

// ============================================================================
// Any component
// ============================================================================

/// A resolved component of any kind
#[derive(Debug, Clone)]
pub enum AnyComponent {
    Tool(Tool),
    Resource(Resource),
    Template(ResourceTemplate),
    Prompt(Prompt),
}

impl AnyComponent {
    fn inner(&self) -> &dyn Component {
        match self {
            Self::Tool(c) => c,
            Self::Resource(c) => c,
            Self::Template(c) => c,
            Self::Prompt(c) => c,
        }
    }
}

impl Versioned for AnyComponent {
    fn key(&self) -> &str {
        self.inner().key()
    }
    fn version(&self) -> Option<&str> {
        self.inner().version()
    }
}

impl Component for AnyComponent {
    fn kind(&self) -> ComponentKind {
        self.inner().kind()
    }
    fn meta(&self) -> &ComponentMeta {
        self.inner().meta()
    }
    fn meta_mut(&mut self) -> &mut ComponentMeta {
        match self {
            Self::Tool(c) => &mut c.meta,
            Self::Resource(c) => &mut c.meta,
            Self::Template(c) => &mut c.meta,
            Self::Prompt(c) => &mut c.meta,
        }
    }
}
