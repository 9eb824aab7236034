//! Dispatch pipeline integration tests
//!
//! End-to-end tests driving `McpServer::handle_request` through providers,
//! middleware and transforms. Covers versioned resolution, aggregate
//! failure isolation, auth, schema dereferencing, search, error masking and
//! JSON-RPC routing.

use a3s_mcp::auth::CheckError;
use a3s_mcp::middleware::{AuthMiddleware, BulkToolCaller, LoggingMiddleware, ToolInjection};
use a3s_mcp::protocol::ResourceResult;
use a3s_mcp::provider::{PromptProvider, ResourceProvider, TemplateProvider, ToolProvider};
use a3s_mcp::transform::{Namespace, SchemaDereference, SearchTransform, VersionFilter, Visibility};
use a3s_mcp::{
    compare_versions, require_scopes, AccessToken, AuthCheck, ComponentKind, JsonRpcRequest,
    JsonRpcResponse, LocalProvider, McpError, McpServer, Prompt, PromptResult, Provider, Resource,
    Session, Tool, ToolResult, Transport, WithMeta,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Arc;

fn test_server() -> McpServer {
    McpServer::builder("test").build().unwrap()
}

fn echo(name: &str) -> Tool {
    Tool::new(name, |args, _| async move { Ok(ToolResult::json(args)) })
}

fn versioned(name: &str, version: &str) -> Tool {
    let label = version.to_string();
    Tool::new(name, move |_, _| {
        let label = label.clone();
        async move { Ok(ToolResult::text(label)) }
    })
    .with_version(version)
}

async fn call(server: &McpServer, session: &Session, method: &str, params: Value) -> JsonRpcResponse {
    server
        .handle_request(session, JsonRpcRequest::new(1, method, Some(params)))
        .await
}

async fn ok(server: &McpServer, method: &str, params: Value) -> Value {
    let response = call(server, &Session::new("s"), method, params).await;
    match response.error {
        Some(e) => panic!("{} failed: {} {}", method, e.code, e.message),
        None => response.result.unwrap(),
    }
}

fn tool_names(listing: &Value) -> Vec<String> {
    listing["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

fn first_text(result: &Value) -> String {
    result["content"][0]["text"].as_str().unwrap().to_string()
}

struct Broken;

#[async_trait]
impl ToolProvider for Broken {
    async fn list_tools(&self) -> a3s_mcp::Result<Vec<Tool>> {
        Err(McpError::Provider("upstream unavailable".into()))
    }
}

impl ResourceProvider for Broken {}
impl TemplateProvider for Broken {}
impl PromptProvider for Broken {}

impl Provider for Broken {
    fn name(&self) -> &str {
        "broken"
    }
}

// ─── Versions ────────────────────────────────────────────────────

#[test]
fn test_version_ordering() {
    assert_eq!(compare_versions(Some("1.0"), Some("2.0")), Ordering::Less);
    assert_eq!(compare_versions(Some("2.0"), Some("1.0")), Ordering::Greater);
    assert_eq!(compare_versions(None, Some("1.0")), Ordering::Less);
    assert_eq!(compare_versions(Some("v1.0"), Some("1.0")), Ordering::Equal);
}

#[tokio::test]
async fn test_call_resolves_highest_version() {
    let server = test_server();
    server.add_tool(versioned("a", "1.0")).unwrap();
    server.add_tool(versioned("a", "2.0")).unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    assert_eq!(tool_names(&listing), vec!["a"]);

    let result = ok(&server, "tools/call", json!({"name": "a"})).await;
    assert_eq!(first_text(&result), "2.0");
}

#[tokio::test]
async fn test_version_filter_bounds_list_and_call() {
    let server = McpServer::builder("filtered")
        .transform(VersionFilter::new(None, Some("2.0")).unwrap())
        .build()
        .unwrap();
    server.add_tool(versioned("a", "1.0")).unwrap();
    server.add_tool(versioned("a", "2.0")).unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    assert_eq!(listing["tools"].as_array().unwrap().len(), 1);
    assert_eq!(listing["tools"][0]["_meta"]["version"], "1.0");

    let result = ok(&server, "tools/call", json!({"name": "a"})).await;
    assert_eq!(first_text(&result), "1.0");
}

#[test]
fn test_version_filter_requires_a_bound() {
    assert!(matches!(
        VersionFilter::new(None, None),
        Err(McpError::Validation(_))
    ));
}

// ─── Providers ───────────────────────────────────────────────────

#[tokio::test]
async fn test_aggregate_partial_failure() {
    let remote = Arc::new(LocalProvider::new("remote"));
    remote.add_tool(echo("toolA")).unwrap();

    let server = McpServer::builder("agg")
        .provider(Arc::new(Broken))
        .provider(remote)
        .build()
        .unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    assert_eq!(tool_names(&listing), vec!["toolA"]);
}

#[tokio::test]
async fn test_listed_version_is_the_one_called() {
    let older = Arc::new(LocalProvider::new("older"));
    older.add_tool(versioned("a", "1.0")).unwrap();
    let newer = Arc::new(LocalProvider::new("newer"));
    newer.add_tool(versioned("a", "2.0")).unwrap();

    let server = McpServer::builder("two")
        .provider(older)
        .provider(newer)
        .build()
        .unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    let tools = listing["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["_meta"]["version"], "2.0");

    let result = ok(&server, "tools/call", json!({"name": "a"})).await;
    assert_eq!(first_text(&result), "2.0");
}

#[tokio::test]
async fn test_duplicate_provider_name_rejected() {
    let result = McpServer::builder("dup")
        .provider(Arc::new(LocalProvider::new("remote")))
        .provider(Arc::new(LocalProvider::new("remote")))
        .build();
    assert!(matches!(result, Err(McpError::Config(_))));
}

#[tokio::test]
async fn test_disabled_tool_is_not_found() {
    let server = test_server();
    server.add_tool(echo("secret")).unwrap();
    server.registry().disable(ComponentKind::Tool, "secret").unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    assert!(tool_names(&listing).is_empty());

    let response = call(&server, &Session::new("s"), "tools/call", json!({"name": "secret"})).await;
    assert_eq!(response.error.unwrap().code, -32002);

    server.registry().enable(ComponentKind::Tool, "secret").unwrap();
    ok(&server, "tools/call", json!({"name": "secret"})).await;
}

#[tokio::test]
async fn test_removed_provider_drops_components() {
    let remote = Arc::new(LocalProvider::new("remote"));
    remote.add_tool(echo("remote_tool")).unwrap();
    let server = McpServer::builder("rm").provider(remote).build().unwrap();

    assert_eq!(tool_names(&ok(&server, "tools/list", json!({})).await).len(), 1);
    assert!(server.registry().remove_provider("remote").unwrap());
    assert!(tool_names(&ok(&server, "tools/list", json!({})).await).is_empty());
}

// ─── Auth ────────────────────────────────────────────────────────

fn http(token: Option<AccessToken>) -> Session {
    let session = Session::new("h").with_transport(Transport::Http);
    match token {
        Some(token) => session.with_token(token),
        None => session,
    }
}

#[tokio::test]
async fn test_auth_middleware_filters_and_denies() {
    let server = McpServer::builder("auth")
        .middleware(AuthMiddleware::new(vec![a3s_mcp::restrict_tag(
            "admin",
            ["admin:write"],
        )]))
        .build()
        .unwrap();
    server.add_tool(echo("public")).unwrap();
    server.add_tool(echo("wipe").with_tags(["admin"])).unwrap();

    let reader = http(Some(AccessToken::new("t").with_scopes(["read"])));
    let listing = call(&server, &reader, "tools/list", json!({})).await.result.unwrap();
    assert_eq!(tool_names(&listing), vec!["public"]);

    let denied = call(&server, &reader, "tools/call", json!({"name": "wipe"})).await;
    let error = denied.error.unwrap();
    assert_eq!(error.code, -32003);
    assert_eq!(
        error.message,
        "Authorization failed for tool 'wipe': insufficient permissions"
    );

    let admin = http(Some(AccessToken::new("t").with_scopes(["admin:write"])));
    assert!(call(&server, &admin, "tools/call", json!({"name": "wipe"})).await.result.is_some());
}

#[tokio::test]
async fn test_auth_fails_closed() {
    fn server_with(check: AuthCheck) -> McpServer {
        let server = McpServer::builder("closed")
            .middleware(AuthMiddleware::new(vec![check]))
            .build()
            .unwrap();
        server.add_tool(echo("x")).unwrap();
        server
    }

    let refusing = server_with(AuthCheck::new("refuse", |_| Ok(false)));
    let crashing = server_with(AuthCheck::new("crash", |_| {
        Err(CheckError::Unexpected("claims service timed out".into()))
    }));

    for (session, code) in [(http(Some(AccessToken::new("t"))), -32003), (http(None), -32001)] {
        let a = call(&refusing, &session, "tools/call", json!({"name": "x"})).await.error.unwrap();
        let b = call(&crashing, &session, "tools/call", json!({"name": "x"})).await.error.unwrap();
        assert_eq!(a.code, code);
        assert_eq!(b.code, code);
        assert_eq!(a.message, b.message);
        assert!(!b.message.contains("timed out"));

        for server in [&refusing, &crashing] {
            let listing = call(server, &session, "tools/list", json!({})).await.result.unwrap();
            assert!(tool_names(&listing).is_empty());
        }
    }
}

#[tokio::test]
async fn test_explicit_denial_is_verbatim() {
    let server = McpServer::builder("deny")
        .middleware(AuthMiddleware::new(vec![AuthCheck::new("office_hours", |_| {
            Err(CheckError::Denied("Try again during office hours".into()))
        })]))
        .build()
        .unwrap();
    server.add_tool(echo("x")).unwrap();

    let response = call(&server, &http(Some(AccessToken::new("t"))), "tools/call", json!({"name": "x"})).await;
    assert_eq!(response.error.unwrap().message, "Try again during office hours");
}

#[tokio::test]
async fn test_component_scopes_and_unauthenticated_caller() {
    let server = test_server();
    server
        .add_tool(echo("billing").with_auth(require_scopes(["billing"])))
        .unwrap();

    let anonymous = call(&server, &http(None), "tools/call", json!({"name": "billing"})).await;
    assert_eq!(anonymous.error.unwrap().code, -32001);

    let listing = call(&server, &http(None), "tools/list", json!({})).await.result.unwrap();
    assert!(tool_names(&listing).is_empty());

    let billing = http(Some(AccessToken::new("t").with_scopes(["billing"])));
    assert!(call(&server, &billing, "tools/call", json!({"name": "billing"})).await.result.is_some());
}

// ─── Injected Tools ──────────────────────────────────────────────

#[tokio::test]
async fn test_injected_tool_listed_and_called() {
    let server = McpServer::builder("inject")
        .middleware(ToolInjection::new(vec![Tool::new("whoami", |_, ctx| async move {
            Ok(ToolResult::text(ctx.session_id().to_string()))
        })]))
        .build()
        .unwrap();
    server.add_tool(echo("a")).unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    assert_eq!(tool_names(&listing), vec!["whoami", "a"]);

    let result = ok(&server, "tools/call", json!({"name": "whoami"})).await;
    assert_eq!(first_text(&result), "s");
}

#[tokio::test]
async fn test_bulk_calls_run_through_pipeline() {
    let server = McpServer::builder("bulk")
        .middleware(BulkToolCaller::new())
        .middleware(AuthMiddleware::new(vec![a3s_mcp::auth::restrict_tag("admin", ["admin"])]))
        .build()
        .unwrap();
    server.add_tool(echo("greet")).unwrap();
    server.add_tool(echo("wipe").with_tags(["admin"])).unwrap();
    server
        .add_tool(Tool::new("picky", |_, _| async {
            Err::<ToolResult, _>(McpError::ToolExecution("city not supported".into()))
        }))
        .unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    assert_eq!(tool_names(&listing)[..2], ["call_tools_bulk", "call_tool_bulk"]);

    let result = ok(
        &server,
        "tools/call",
        json!({"name": "call_tool_bulk", "arguments": {
            "tool": "greet",
            "tool_arguments": [{"name": "Ada"}, {"name": "Alan"}]
        }}),
    )
    .await;
    let entries = result["structuredContent"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["structuredContent"], json!({"name": "Alan"}));

    let session = http(Some(AccessToken::new("t")));
    let response = call(
        &server,
        &session,
        "tools/call",
        json!({"name": "call_tools_bulk", "arguments": {"tool_calls": [
            {"tool": "picky"},
            {"tool": "wipe"},
            {"tool": "greet", "arguments": {"name": "Ada"}}
        ]}}),
    )
    .await;
    let result = response.result.unwrap();
    let entries = result["structuredContent"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["isError"], true);
    assert_eq!(entries[0]["content"][0]["text"], "Error calling tool 'picky': city not supported");
    assert_eq!(entries[1]["isError"], true);
    assert_eq!(entries[2]["isError"], false);
}

// ─── Transforms ──────────────────────────────────────────────────

#[tokio::test]
async fn test_schema_dereference_on_listing() {
    let server = McpServer::builder("schema")
        .transform(SchemaDereference::new())
        .build()
        .unwrap();
    server
        .add_tool(echo("paint").with_parameters(json!({
            "type": "object",
            "$defs": {"Color": {"type": "string", "enum": ["red", "green"]}},
            "properties": {"color": {"$ref": "#/$defs/Color"}}
        })))
        .unwrap();
    server
        .add_tool(echo("tree").with_parameters(json!({
            "$defs": {"Node": {
                "type": "object",
                "properties": {"child": {"$ref": "#/$defs/Node"}}
            }},
            "properties": {"root": {"$ref": "#/$defs/Node"}}
        })))
        .unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    let tools = listing["tools"].as_array().unwrap();
    let paint = tools.iter().find(|t| t["name"] == "paint").unwrap();
    assert!(paint["inputSchema"].get("$defs").is_none());
    assert_eq!(paint["inputSchema"]["properties"]["color"]["enum"], json!(["red", "green"]));

    let tree = tools.iter().find(|t| t["name"] == "tree").unwrap();
    assert!(tree["inputSchema"].get("$defs").is_some());
    assert_eq!(tree["inputSchema"]["properties"]["root"]["$ref"], "#/$defs/Node");
}

#[tokio::test]
async fn test_search_replaces_catalog() {
    let server = McpServer::builder("search")
        .transform(SearchTransform::new().with_always_visible(["help"]))
        .build()
        .unwrap();
    server.add_tool(echo("help")).unwrap();
    server
        .add_tool(echo("get_weather").with_description("Current weather for a city"))
        .unwrap();
    server
        .add_tool(echo("send_email").with_description("Send an email message"))
        .unwrap();

    let mut names = tool_names(&ok(&server, "tools/list", json!({})).await);
    names.sort();
    assert_eq!(names, vec!["call_tool", "help", "search_tools"]);

    let found = ok(
        &server,
        "tools/call",
        json!({"name": "search_tools", "arguments": {"query": "WEATHER"}}),
    )
    .await;
    let matches = found["structuredContent"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["name"], "get_weather");

    let proxied = ok(
        &server,
        "tools/call",
        json!({"name": "call_tool", "arguments": {"name": "send_email", "arguments": {"to": "a@b.c"}}}),
    )
    .await;
    assert_eq!(proxied["structuredContent"]["to"], "a@b.c");

    let direct = ok(&server, "tools/call", json!({"name": "send_email", "arguments": {"to": "x"}})).await;
    assert_eq!(direct["structuredContent"]["to"], "x");
}

#[tokio::test]
async fn test_search_respects_auth() {
    let server = McpServer::builder("search-auth")
        .middleware(AuthMiddleware::new(vec![a3s_mcp::restrict_tag("admin", ["admin"])]))
        .transform(SearchTransform::new())
        .build()
        .unwrap();
    server.add_tool(echo("admin_reset").with_tags(["admin"])).unwrap();
    server.add_tool(echo("user_reset")).unwrap();

    let session = http(Some(AccessToken::new("t")));
    let found = call(
        &server,
        &session,
        "tools/call",
        json!({"name": "search_tools", "arguments": {"query": "reset"}}),
    )
    .await
    .result
    .unwrap();
    let names: Vec<&str> = found["structuredContent"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["user_reset"]);
}

#[tokio::test]
async fn test_namespace_and_visibility() {
    let server = McpServer::builder("ns")
        .transform(Namespace::new("weather"))
        .transform(Visibility::new().hide_tags(["internal"]))
        .build()
        .unwrap();
    server.add_tool(echo("forecast")).unwrap();
    server.add_tool(echo("debug").with_tags(["internal"])).unwrap();

    let listing = ok(&server, "tools/list", json!({})).await;
    assert_eq!(tool_names(&listing), vec!["weather_forecast"]);

    ok(&server, "tools/call", json!({"name": "weather_forecast"})).await;
    let hidden = call(&server, &Session::new("s"), "tools/call", json!({"name": "weather_debug"})).await;
    assert_eq!(hidden.error.unwrap().code, -32002);
    let raw = call(&server, &Session::new("s"), "tools/call", json!({"name": "forecast"})).await;
    assert_eq!(raw.error.unwrap().code, -32002);
}

// ─── Errors & Routing ────────────────────────────────────────────

#[tokio::test]
async fn test_tool_errors_in_band_and_masked() {
    let server = McpServer::builder("mask")
        .mask_error_details(true)
        .middleware(LoggingMiddleware::new().with_payloads(64))
        .build()
        .unwrap();
    server
        .add_tool(Tool::new("leaky", |_, _| async {
            Err::<ToolResult, _>(McpError::Backend("redis://10.0.0.3 refused".into()))
        }))
        .unwrap();
    server
        .add_tool(Tool::new("picky", |_, _| async {
            Err::<ToolResult, _>(McpError::ToolExecution("city not supported".into()))
        }))
        .unwrap();
    server
        .add_tool(Tool::new("strict", |_, _| async {
            Err::<ToolResult, _>(McpError::Validation("missing 'city'".into()))
        }))
        .unwrap();

    let leaky = ok(&server, "tools/call", json!({"name": "leaky"})).await;
    assert_eq!(leaky["isError"], true);
    assert_eq!(first_text(&leaky), "Internal error: an unexpected error occurred");

    let picky = ok(&server, "tools/call", json!({"name": "picky"})).await;
    assert_eq!(picky["isError"], true);
    assert_eq!(first_text(&picky), "city not supported");

    let strict = call(&server, &Session::new("s"), "tools/call", json!({"name": "strict"})).await;
    let error = strict.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("missing 'city'"));
}

#[tokio::test]
async fn test_missing_required_argument_is_rejected() {
    let server = test_server();
    server
        .add_tool(echo("weather").with_parameters(json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        })))
        .unwrap();
    let session = Session::new("s");

    let missing = call(&server, &session, "tools/call", json!({"name": "weather"})).await;
    let error = missing.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("city"));

    let wrong = call(
        &server,
        &session,
        "tools/call",
        json!({"name": "weather", "arguments": {"city": 12}}),
    )
    .await;
    assert_eq!(wrong.error.unwrap().code, -32602);

    let result = ok(&server, "tools/call", json!({"name": "weather", "arguments": {"city": "Oslo"}})).await;
    assert_eq!(result["structuredContent"]["city"], "Oslo");
}

#[tokio::test]
async fn test_resources_and_prompts() {
    let server = test_server();
    server
        .add_resource(Resource::text("config://app", "app config", "debug=false"))
        .unwrap();
    server
        .add_prompt(
            Prompt::new("greet", |args| async move {
                Ok(PromptResult::user(format!("Hello, {}!", args["name"])))
            })
            .with_argument("name", true),
        )
        .unwrap();

    let resources = ok(&server, "resources/list", json!({})).await;
    assert_eq!(resources["resources"][0]["uri"], "config://app");

    let read = ok(&server, "resources/read", json!({"uri": "config://app"})).await;
    assert_eq!(read["contents"][0]["text"], "debug=false");

    let prompts = ok(&server, "prompts/list", json!({})).await;
    assert_eq!(prompts["prompts"][0]["arguments"][0]["name"], "name");

    let rendered = ok(&server, "prompts/get", json!({"name": "greet", "arguments": {"name": "Ada"}})).await;
    assert_eq!(rendered["messages"][0]["content"]["text"], "Hello, Ada!");

    let missing = call(&server, &Session::new("s"), "prompts/get", json!({"name": "greet"})).await;
    assert_eq!(missing.error.unwrap().code, -32602);

    let unknown = call(&server, &Session::new("s"), "resources/read", json!({"uri": "config://nope"})).await;
    assert_eq!(unknown.error.unwrap().code, -32002);
}

#[tokio::test]
async fn test_resource_template_listing_and_read() {
    let server = test_server();
    server
        .add_template(a3s_mcp::ResourceTemplate::new(
            "users://{id}/profile",
            "profile",
            |params| async move {
                Ok(ResourceResult::text(
                    format!("users://{}/profile", params["id"]),
                    Some("application/json"),
                    json!({"id": params["id"]}).to_string(),
                ))
            },
        ))
        .unwrap();

    let templates = ok(&server, "resources/templates/list", json!({})).await;
    assert_eq!(templates["resourceTemplates"][0]["uriTemplate"], "users://{id}/profile");

    let read = ok(&server, "resources/read", json!({"uri": "users://42/profile"})).await;
    assert_eq!(read["contents"][0]["mimeType"], "application/json");
    assert!(read["contents"][0]["text"].as_str().unwrap().contains("42"));
}

#[tokio::test]
async fn test_ping_and_missing_params() {
    let server = test_server();
    assert_eq!(ok(&server, "ping", json!({})).await, json!({}));

    let response = call(&server, &Session::new("s"), "tools/call", json!({})).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("name"));

    let response = server
        .handle_request(&Session::new("s"), JsonRpcRequest::new("req-7", "nope/nothing", None))
        .await;
    assert_eq!(response.id, json!("req-7"));
    assert_eq!(response.error.unwrap().code, -32601);
}
