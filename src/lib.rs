//! # a3s-mcp
//!
//! Provider-composed MCP server runtime for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-mcp` merges any number of component providers into one versioned
//! catalog of tools, resources, resource templates and prompts, runs every
//! request through a middleware and transform pipeline, and lets any call
//! complete in the background as a task. Wire framing (stdio, HTTP, SSE) is
//! left to the embedding transport.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_mcp::{JsonRpcRequest, McpServer, Session, Tool, ToolResult};
//! use a3s_mcp::middleware::LoggingMiddleware;
//! use a3s_mcp::transform::SchemaDereference;
//!
//! # async fn example() -> a3s_mcp::Result<()> {
//! let server = McpServer::builder("weather")
//!     .middleware(LoggingMiddleware::new())
//!     .transform(SchemaDereference::new())
//!     .build()?;
//!
//! server.add_tool(Tool::new("forecast", |args, _ctx| async move {
//!     let city = args["city"].as_str().unwrap_or("nowhere").to_string();
//!     Ok(ToolResult::text(format!("Sunny in {}", city)))
//! }))?;
//!
//! let response = server
//!     .handle_request(
//!         &Session::new("session-1"),
//!         JsonRpcRequest::new(1, "tools/call", Some(serde_json::json!({
//!             "name": "forecast",
//!             "arguments": {"city": "Paris"}
//!         }))),
//!     )
//!     .await;
//! assert!(response.error.is_none());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **ComponentRegistry**: local registrations plus providers, merged by an
//!   `AggregateProvider`; resolves components by key and version
//! - **Middleware**: message-level onion around every catalog request
//!   (auth, logging)
//! - **Transform**: catalog-level rewriting between middleware and registry
//!   (version filter, schema dereference, search, visibility, namespace)
//! - **TaskEngine**: background execution on an `ExecutionBackend` with
//!   status, result, cancellation and push notifications
//! - **McpServer**: JSON-RPC routing, error masking and lifecycle hooks

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod server;
pub mod task;
pub mod transform;
pub mod types;
pub mod version;

// Re-export core types
pub use auth::{require_auth, require_scopes, restrict_tag, AccessToken, AuthCheck, CheckError};
pub use config::{ServerConfig, TaskConfig};
pub use context::{Catalog, DispatchContext, Operation, Reply, Request, Transport};
pub use error::{McpError, Result};
pub use lifecycle::{FnHook, Lifecycle, LifecycleHook, LifespanState};
pub use middleware::{Middleware, MiddlewareChain, Next};
pub use protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PromptResult, ResourceResult, TaskInfo,
    TaskStatus, ToolResult,
};
pub use provider::{AggregateProvider, LocalProvider, Provider};
pub use registry::ComponentRegistry;
pub use server::{McpServer, McpServerBuilder, Session};
pub use task::{ExecutionBackend, ExecutionKey, MemoryBackend, NotificationSink, TaskEngine};
pub use transform::{CatalogNext, Transform, TransformChain};
pub use types::{
    Annotations, Component, ComponentKind, Prompt, Resource, ResourceTemplate, TaskMode, Tool,
    ToolContext, WithMeta,
};
pub use version::{compare_versions, VersionKey, VersionSpec};
