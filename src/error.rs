//! Error types for a3s-mcp

use thiserror::Error;

/// JSON-RPC error codes used by the dispatcher
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const AUTHENTICATION_REQUIRED: i32 = -32001;
    pub const NOT_FOUND: i32 = -32002;
    pub const AUTHORIZATION_DENIED: i32 = -32003;
}

/// Errors that can occur while dispatching MCP operations
#[derive(Debug, Error)]
pub enum McpError {
    /// Unknown or disabled component
    #[error("Not found: {0}")]
    NotFound(String),

    /// No identity, or an identity that could not be resolved
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// Identity present but lacking the rights for the component
    #[error("{0}")]
    AuthorizationDenied(String),

    /// Component logic reported a failure
    #[error("{0}")]
    ToolExecution(String),

    /// Argument or parameter shape mismatch
    #[error("Validation error: {0}")]
    Validation(String),

    /// Background execution failed
    #[error("Task error: {0}")]
    Task(String),

    /// Protocol method is not served
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Execution backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl McpError {
    /// JSON-RPC error code reported to clients
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound(_) => codes::NOT_FOUND,
            Self::AuthenticationRequired(_) => codes::AUTHENTICATION_REQUIRED,
            Self::AuthorizationDenied(_) => codes::AUTHORIZATION_DENIED,
            Self::Validation(_) => codes::INVALID_PARAMS,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Whether this error is an unexpected failure rather than an explicit signal
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Provider(_)
                | Self::Backend(_)
                | Self::Config(_)
                | Self::Internal(_)
                | Self::Serialization(_)
        )
    }

    /// Hide internal details when `mask` is set. Explicit signals pass through.
    pub fn masked(self, mask: bool) -> Self {
        if mask && self.is_internal() {
            Self::Internal("an unexpected error occurred".to_string())
        } else {
            self
        }
    }
}

/// Result type alias for MCP operations
pub type Result<T> = std::result::Result<T, McpError>;
