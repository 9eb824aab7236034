//! Server configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use crate::error::{McpError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name reported by `initialize` (default: a3s-mcp)
    #[serde(default = "default_name")]
    pub name: String,

    /// Server version reported by `initialize`
    #[serde(default = "default_version")]
    pub version: String,

    /// Instructions returned to clients on `initialize`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Replace internal error details with a generic message (default: false)
    #[serde(default)]
    pub mask_error_details: bool,

    /// Background task settings
    #[serde(default)]
    pub tasks: TaskConfig,
}

fn default_name() -> String {
    "a3s-mcp".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            instructions: None,
            mask_error_details: false,
            tasks: TaskConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| McpError::Config(format!("Invalid server config: {}", e)))
    }

    /// Load configuration from a TOML file.
    /// Returns the default config if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            McpError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| McpError::Config(format!("Failed to encode server config: {}", e)))
    }
}

/// Task engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Retention when the client does not ask for one (default: 60000)
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Upper bound on any retention (default: one day)
    #[serde(default = "default_max_ttl_ms")]
    pub max_ttl_ms: u64,

    /// Suggested client poll interval (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Page size for `tasks/list` when the client gives no limit (default: 50)
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Push `notifications/tasks/status` to the submitting session (default: true)
    #[serde(default = "default_notifications")]
    pub notifications: bool,
}

fn default_ttl_ms() -> u64 {
    60_000
}

fn default_max_ttl_ms() -> u64 {
    86_400_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_list_page_size() -> usize {
    50
}

fn default_notifications() -> bool {
    true
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            max_ttl_ms: default_max_ttl_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            list_page_size: default_list_page_size(),
            notifications: default_notifications(),
        }
    }
}

impl TaskConfig {
    /// Retention actually applied for a requested ttl, counted from the
    /// moment the task reaches a terminal state
    pub fn effective_ttl(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_ttl_ms)
            .min(self.max_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.name, "a3s-mcp");
        assert!(!config.mask_error_details);
        assert_eq!(config.tasks.default_ttl_ms, 60_000);
        assert_eq!(config.tasks.poll_interval_ms, 1_000);
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
            name = "weather"
            mask_error_details = true

            [tasks]
            max_ttl_ms = 5000
        "#;
        let config = ServerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.name, "weather");
        assert!(config.mask_error_details);
        assert_eq!(config.tasks.max_ttl_ms, 5000);
        assert_eq!(config.tasks.default_ttl_ms, 60_000);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config.name, "a3s-mcp");
        assert!(config.tasks.notifications);
    }

    #[test]
    fn test_invalid_config() {
        let err = ServerConfig::from_toml_str("tasks = 3").unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = ServerConfig::load("/nonexistent/a3s-mcp.toml").unwrap();
        assert_eq!(config.tasks.list_page_size, 50);
    }

    #[test]
    fn test_config_serialize() {
        let serialized = ServerConfig::default().to_toml_string().unwrap();
        assert!(serialized.contains("name"));
        assert!(serialized.contains("[tasks]"));
    }

    #[test]
    fn test_effective_ttl_clamped() {
        let tasks = TaskConfig::default();
        assert_eq!(tasks.effective_ttl(None), 60_000);
        assert_eq!(tasks.effective_ttl(Some(5_000)), 5_000);
        assert_eq!(tasks.effective_ttl(Some(u64::MAX)), 86_400_000);
    }
}
