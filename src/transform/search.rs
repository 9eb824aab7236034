//! Search transform
//!
//! Replaces the tool listing with a search tool and a call-by-name proxy so
//! clients discover tools on demand instead of receiving the full catalog.
//! Hidden tools stay callable by name. This trims what is enumerated; it is
//! not an access control.

use super::{CatalogNext, Transform};
use crate::context::{DispatchContext, Request};
use crate::error::{McpError, Result};
use crate::protocol::ToolResult;
use crate::types::{Tool, ToolContext, WithMeta};
use crate::version::VersionSpec;
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// How a query is matched against tool text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Case-insensitive regex, falling back to a literal match for invalid patterns
    #[default]
    Regex,
    /// Rank by how many whitespace-separated query terms occur
    Keyword,
}

#[derive(Debug, Clone)]
struct Settings {
    max_results: usize,
    always_visible: HashSet<String>,
    search_tool_name: String,
    call_tool_name: String,
    strategy: SearchStrategy,
}

/// Catalog-hiding search interface
#[derive(Debug, Clone)]
pub struct SearchTransform {
    settings: Arc<Settings>,
}

impl SearchTransform {
    pub fn new() -> Self {
        Self {
            settings: Arc::new(Settings {
                max_results: 5,
                always_visible: HashSet::new(),
                search_tool_name: "search_tools".to_string(),
                call_tool_name: "call_tool".to_string(),
                strategy: SearchStrategy::default(),
            }),
        }
    }

    fn settings_mut(&mut self) -> &mut Settings {
        Arc::make_mut(&mut self.settings)
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.settings_mut().max_results = max_results;
        self
    }

    /// Tools that stay listed next to the synthetic tools
    pub fn with_always_visible<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings_mut()
            .always_visible
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_tool_names(
        mut self,
        search_tool_name: impl Into<String>,
        call_tool_name: impl Into<String>,
    ) -> Self {
        let settings = self.settings_mut();
        settings.search_tool_name = search_tool_name.into();
        settings.call_tool_name = call_tool_name.into();
        self
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.settings_mut().strategy = strategy;
        self
    }

    fn search_tool(&self) -> Tool {
        let settings = self.settings.clone();
        Tool::new(
            self.settings.search_tool_name.clone(),
            move |args: Value, ctx: ToolContext| {
                let settings = settings.clone();
                async move { run_search(&settings, args, ctx).await }
            },
        )
        .with_description(
            "Search available tools by name, description or parameter. \
             Returns matching tool definitions.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Text or pattern to search for"}
            },
            "required": ["query"]
        }))
    }

    fn call_tool(&self) -> Tool {
        let own_name = self.settings.call_tool_name.clone();
        Tool::new(
            self.settings.call_tool_name.clone(),
            move |args: Value, ctx: ToolContext| {
                let own_name = own_name.clone();
                async move { run_proxy(&own_name, args, ctx).await }
            },
        )
        .with_description(
            "Call a tool by name with the given arguments. \
             Use this to execute tools discovered via search.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "The name of the tool to call"},
                "arguments": {"type": "object", "description": "Arguments to pass to the tool"}
            },
            "required": ["name"]
        }))
    }
}

impl Default for SearchTransform {
    fn default() -> Self {
        Self::new()
    }
}

/// Name, description, parameter names and parameter descriptions
fn searchable_text(tool: &Tool) -> String {
    let mut parts = vec![tool.name.clone()];
    if let Some(description) = &tool.meta.description {
        parts.push(description.clone());
    }
    if let Some(properties) = tool.parameters.get("properties").and_then(Value::as_object) {
        for (name, info) in properties {
            parts.push(name.clone());
            if let Some(desc) = info.get("description").and_then(Value::as_str) {
                if !desc.is_empty() {
                    parts.push(desc.to_string());
                }
            }
        }
    }
    parts.join(" ")
}

fn rank(strategy: SearchStrategy, tools: Vec<Tool>, query: &str, limit: usize) -> Vec<Tool> {
    match strategy {
        SearchStrategy::Regex => {
            let pattern = RegexBuilder::new(query)
                .case_insensitive(true)
                .build()
                .or_else(|_| {
                    RegexBuilder::new(&regex::escape(query))
                        .case_insensitive(true)
                        .build()
                });
            let Ok(pattern) = pattern else {
                return Vec::new();
            };
            tools
                .into_iter()
                .filter(|t| pattern.is_match(&searchable_text(t)))
                .take(limit)
                .collect()
        }
        SearchStrategy::Keyword => {
            let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
            let mut scored: Vec<(usize, usize, Tool)> = tools
                .into_iter()
                .enumerate()
                .filter_map(|(i, t)| {
                    let text = searchable_text(&t).to_lowercase();
                    let score = terms.iter().filter(|term| text.contains(term.as_str())).count();
                    (score > 0).then_some((score, i, t))
                })
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
            scored.into_iter().take(limit).map(|(_, _, t)| t).collect()
        }
    }
}

async fn run_search(settings: &Settings, args: Value, ctx: ToolContext) -> Result<ToolResult> {
    let query = args
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| McpError::Validation("search requires a 'query' string".to_string()))?;
    let catalog = ctx
        .dispatch()
        .catalog
        .clone()
        .ok_or_else(|| McpError::Internal("search tool has no catalog".to_string()))?;

    let visible: Vec<Tool> = catalog
        .list_tools(&ctx.dispatch().unfiltered_listing())
        .await?
        .into_iter()
        .filter(|t| !settings.always_visible.contains(&t.name))
        .collect();
    let matches = rank(settings.strategy, visible, query, settings.max_results);
    tracing::debug!(query, matches = matches.len(), "Tool search");

    let wire: Vec<Value> = matches
        .iter()
        .map(|t| serde_json::to_value(t.to_wire()))
        .collect::<std::result::Result<_, _>>()?;
    Ok(ToolResult::json(Value::Array(wire)))
}

async fn run_proxy(own_name: &str, args: Value, ctx: ToolContext) -> Result<ToolResult> {
    let name = args
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| McpError::Validation("call_tool requires a 'name' string".to_string()))?;
    if name == own_name {
        return Err(McpError::Validation(format!(
            "'{}' cannot call itself",
            own_name
        )));
    }
    let arguments = args.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let catalog = ctx
        .dispatch()
        .catalog
        .clone()
        .ok_or_else(|| McpError::Internal("call proxy has no catalog".to_string()))?;

    let nested = ctx.dispatch().nested(Request::CallTool {
        name: name.to_string(),
        arguments: arguments.clone(),
    });
    catalog.call_tool(&nested, name, arguments).await
}

#[async_trait]
impl Transform for SearchTransform {
    fn name(&self) -> &str {
        "search"
    }

    async fn list_tools(&self, ctx: &DispatchContext, tools: Vec<Tool>) -> Result<Vec<Tool>> {
        if ctx.bypass_search {
            return Ok(tools);
        }
        let mut listed: Vec<Tool> = tools
            .into_iter()
            .filter(|t| self.settings.always_visible.contains(&t.name))
            .collect();
        listed.push(self.search_tool());
        listed.push(self.call_tool());
        Ok(listed)
    }

    async fn get_tool(
        &self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Tool>> {
        if name == self.settings.search_tool_name {
            return Ok(Some(self.search_tool()));
        }
        if name == self.settings.call_tool_name {
            return Ok(Some(self.call_tool()));
        }
        next.get_tool(ctx, name, version).await
    }
}
