//! Request logging middleware

use super::{Middleware, Next};
use crate::context::{DispatchContext, Reply};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Instant;

/// Logs each request's method, session, duration and outcome
pub struct LoggingMiddleware {
    include_payloads: bool,
    max_payload_length: usize,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self {
            include_payloads: false,
            max_payload_length: 1000,
        }
    }

    /// Also log request params, truncated to `max_payload_length` characters
    pub fn with_payloads(mut self, max_payload_length: usize) -> Self {
        self.include_payloads = true;
        self.max_payload_length = max_payload_length;
        self
    }

    fn payload(&self, ctx: &DispatchContext) -> Option<String> {
        if !self.include_payloads {
            return None;
        }
        let text = ctx.message.to_string();
        Some(truncate(&text, self.max_payload_length))
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn summarize(reply: &Reply) -> String {
    match reply {
        Reply::Tools(items) => format!("{} tools", items.len()),
        Reply::Resources(items) => format!("{} resources", items.len()),
        Reply::ResourceTemplates(items) => format!("{} templates", items.len()),
        Reply::Prompts(items) => format!("{} prompts", items.len()),
        Reply::ToolResult(result) if result.is_error => "tool error".to_string(),
        Reply::ToolResult(_) => "tool result".to_string(),
        Reply::Resource(result) => format!("{} contents", result.contents.len()),
        Reply::Prompt(result) => format!("{} messages", result.messages.len()),
        Reply::Task(task) => format!("task {} {}", task.task_id, task.status),
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) -> Result<Reply> {
        let method = ctx.method();
        let session = ctx.session_id.clone();
        match self.payload(ctx) {
            Some(payload) => tracing::info!(method, session = %session, payload = %payload, "Processing request"),
            None => tracing::info!(method, session = %session, "Processing request"),
        }

        let started = Instant::now();
        let result = next.run(ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(reply) => tracing::info!(
                method,
                session = %session,
                elapsed_ms,
                outcome = %summarize(reply),
                "Request completed"
            ),
            Err(e) => tracing::warn!(
                method,
                session = %session,
                elapsed_ms,
                error = %e,
                "Request failed"
            ),
        }
        result
    }
}
