//! Bulk tool calling
//!
//! Injects two tools: `call_tools_bulk` runs a list of different tool calls,
//! `call_tool_bulk` runs one tool with several argument sets. Calls run in
//! order through the full pipeline, so auth and transforms apply to each.
//! Failures are reported per call; `continue_on_error` (default true)
//! decides whether later calls still run.

use super::injection::ToolInjection;
use super::{Middleware, Next};
use crate::context::{DispatchContext, Reply, Request};
use crate::error::{McpError, Result};
use crate::protocol::{ToolContent, ToolResult};
use crate::types::{Tool, ToolContext, WithMeta};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const CALL_TOOLS_BULK: &str = "call_tools_bulk";
pub const CALL_TOOL_BULK: &str = "call_tool_bulk";

#[derive(Debug, Deserialize)]
struct BulkCall {
    tool: String,
    #[serde(default = "empty_arguments")]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ManyCalls {
    tool_calls: Vec<BulkCall>,
    #[serde(default = "continue_by_default")]
    continue_on_error: bool,
}

#[derive(Debug, Deserialize)]
struct RepeatedCall {
    tool: String,
    tool_arguments: Vec<Value>,
    #[serde(default = "continue_by_default")]
    continue_on_error: bool,
}

fn empty_arguments() -> Value {
    json!({})
}

fn continue_by_default() -> bool {
    true
}

/// Outcome of one call in a bulk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCallResult {
    pub tool: String,
    pub arguments: Value,
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// Middleware adding the bulk calling tools
pub struct BulkToolCaller {
    injection: ToolInjection,
}

impl BulkToolCaller {
    pub fn new() -> Self {
        Self {
            injection: ToolInjection::new(vec![many_tool(), repeated_tool()])
                .with_name("bulk_tool_caller"),
        }
    }
}

impl Default for BulkToolCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for BulkToolCaller {
    fn name(&self) -> &str {
        self.injection.name()
    }

    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) -> Result<Reply> {
        self.injection.handle(ctx, next).await
    }
}

fn many_tool() -> Tool {
    Tool::new(CALL_TOOLS_BULK, |args: Value, ctx: ToolContext| async move {
        let request: ManyCalls = parse(CALL_TOOLS_BULK, args)?;
        let calls = request
            .tool_calls
            .into_iter()
            .map(|call| (call.tool, call.arguments))
            .collect();
        run_all(&ctx, calls, request.continue_on_error).await
    })
    .with_description(
        "Call multiple tools registered on this server in a single request. \
         Each call can be for a different tool with different arguments.",
    )
    .with_parameters(json!({
        "type": "object",
        "properties": {
            "tool_calls": {
                "type": "array",
                "description": "Tool calls to execute, each with a 'tool' name and 'arguments' object",
                "items": {
                    "type": "object",
                    "properties": {
                        "tool": {"type": "string"},
                        "arguments": {"type": "object"}
                    },
                    "required": ["tool"]
                }
            },
            "continue_on_error": {
                "type": "boolean",
                "description": "Keep going after a failed call",
                "default": true
            }
        },
        "required": ["tool_calls"]
    }))
}

fn repeated_tool() -> Tool {
    Tool::new(CALL_TOOL_BULK, |args: Value, ctx: ToolContext| async move {
        let request: RepeatedCall = parse(CALL_TOOL_BULK, args)?;
        let tool = request.tool;
        let calls = request
            .tool_arguments
            .into_iter()
            .map(|arguments| (tool.clone(), arguments))
            .collect();
        run_all(&ctx, calls, request.continue_on_error).await
    })
    .with_description(
        "Call a single tool registered on this server multiple times in one request, \
         once per argument set.",
    )
    .with_parameters(json!({
        "type": "object",
        "properties": {
            "tool": {"type": "string", "description": "The tool to call"},
            "tool_arguments": {
                "type": "array",
                "description": "One arguments object per invocation",
                "items": {"type": "object"}
            },
            "continue_on_error": {
                "type": "boolean",
                "description": "Keep going after a failed call",
                "default": true
            }
        },
        "required": ["tool", "tool_arguments"]
    }))
}

fn parse<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| McpError::Validation(format!("Invalid arguments for tool '{}': {}", tool, e)))
}

async fn run_all(
    ctx: &ToolContext,
    calls: Vec<(String, Value)>,
    continue_on_error: bool,
) -> Result<ToolResult> {
    let catalog = ctx
        .dispatch()
        .catalog
        .clone()
        .ok_or_else(|| McpError::Internal("bulk tool caller has no catalog".to_string()))?;

    let mut results = Vec::with_capacity(calls.len());
    for (tool, arguments) in calls {
        let outcome = if tool == CALL_TOOLS_BULK || tool == CALL_TOOL_BULK {
            Err(McpError::Validation(format!("'{}' cannot be called in bulk", tool)))
        } else {
            let nested = ctx.dispatch().nested(Request::CallTool {
                name: tool.clone(),
                arguments: arguments.clone(),
            });
            catalog.call_tool(&nested, &tool, arguments.clone()).await
        };

        let failed = outcome.is_err();
        let entry = match outcome {
            Ok(result) => BulkCallResult {
                tool,
                arguments,
                content: result.content,
                structured_content: result.structured_content,
                is_error: result.is_error,
            },
            Err(e) => {
                tracing::debug!(session = %ctx.session_id(), tool = %tool, error = %e, "Bulk call failed");
                BulkCallResult {
                    content: vec![ToolContent::Text {
                        text: format!("Error calling tool '{}': {}", tool, e.masked(true)),
                    }],
                    tool,
                    arguments,
                    structured_content: None,
                    is_error: true,
                }
            }
        };
        results.push(entry);

        if failed && !continue_on_error {
            break;
        }
    }
    Ok(ToolResult::json(serde_json::to_value(results)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Catalog;
    use crate::types::{AnyComponent, ComponentKind};
    use std::sync::{Arc, Mutex};

    /// Catalog where `add` sums, `fail` errors, and every call is logged
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Catalog for Recording {
        async fn list_tools(&self, _ctx: &DispatchContext) -> Result<Vec<Tool>> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, ctx: &DispatchContext, name: &str, args: Value) -> Result<ToolResult> {
            assert!(ctx.task.is_none());
            self.seen.lock().unwrap().push(name.to_string());
            match name {
                "add" => {
                    let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
                    Ok(ToolResult::json(json!(sum)))
                }
                "fail" => Err(McpError::ToolExecution("boom".into())),
                "leak" => Err(McpError::Backend("db at 10.0.0.3".into())),
                other => Err(McpError::NotFound(format!("tool '{}'", other))),
            }
        }

        async fn resolve(
            &self,
            _ctx: &DispatchContext,
            _kind: ComponentKind,
            _key: &str,
        ) -> Result<Option<AnyComponent>> {
            Ok(None)
        }
    }

    fn tool_ctx(catalog: Arc<Recording>) -> ToolContext {
        ToolContext::new(DispatchContext::new("s", Request::ListTools).with_catalog(catalog))
    }

    fn entries(result: ToolResult) -> Vec<BulkCallResult> {
        serde_json::from_value(result.structured_content.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_many_calls_continue_past_errors() {
        let catalog = Arc::new(Recording::default());
        let result = many_tool()
            .run(
                json!({"tool_calls": [
                    {"tool": "add", "arguments": {"a": 1, "b": 2}},
                    {"tool": "fail"},
                    {"tool": "add", "arguments": {"a": 5, "b": 5}}
                ]}),
                tool_ctx(catalog.clone()),
            )
            .await
            .unwrap();

        let entries = entries(result);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].structured_content, Some(json!(3)));
        assert!(!entries[0].is_error);
        assert!(entries[1].is_error);
        assert_eq!(
            entries[1].content,
            vec![ToolContent::Text { text: "Error calling tool 'fail': boom".into() }]
        );
        assert_eq!(entries[1].arguments, json!({}));
        assert_eq!(entries[2].structured_content, Some(json!(10)));
        assert_eq!(*catalog.seen.lock().unwrap(), vec!["add", "fail", "add"]);
    }

    #[tokio::test]
    async fn test_stop_on_first_error() {
        let catalog = Arc::new(Recording::default());
        let result = repeated_tool()
            .run(
                json!({
                    "tool": "leak",
                    "tool_arguments": [{"n": 1}, {"n": 2}],
                    "continue_on_error": false
                }),
                tool_ctx(catalog.clone()),
            )
            .await
            .unwrap();

        let entries = entries(result);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].arguments, json!({"n": 1}));
        let ToolContent::Text { text } = &entries[0].content[0] else {
            panic!("expected text content");
        };
        assert!(!text.contains("10.0.0.3"));
        assert_eq!(catalog.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_tools_cannot_recurse() {
        let catalog = Arc::new(Recording::default());
        let result = many_tool()
            .run(
                json!({"tool_calls": [{"tool": CALL_TOOLS_BULK, "arguments": {"tool_calls": []}}]}),
                tool_ctx(catalog.clone()),
            )
            .await
            .unwrap();

        assert!(entries(result)[0].is_error);
        assert!(catalog.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_calls_rejected() {
        let catalog = Arc::new(Recording::default());
        let err = repeated_tool()
            .run(json!({"tool": "add"}), tool_ctx(catalog))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Validation(_)));
    }

    #[test]
    fn test_middleware_name() {
        assert_eq!(BulkToolCaller::new().name(), "bulk_tool_caller");
    }
}
