//! In-memory provider for directly registered components
//!
//! Stores components in registration order behind a `RwLock`. Components are
//! lost on process restart.

use super::{PromptProvider, Provider, ResourceProvider, TemplateProvider, ToolProvider};
use crate::error::{McpError, Result};
use crate::types::{Component, ComponentKind, Prompt, Resource, ResourceTemplate, Tool};
use crate::version::VersionKey;
use async_trait::async_trait;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct LocalState {
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    templates: Vec<ResourceTemplate>,
    prompts: Vec<Prompt>,
}

/// Provider backed by in-process component lists
pub struct LocalProvider {
    name: String,
    state: RwLock<LocalState>,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(LocalState::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LocalState>> {
        self.state.read().map_err(|e| {
            McpError::Internal(format!("Local provider lock poisoned: {}", e))
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LocalState>> {
        self.state.write().map_err(|e| {
            McpError::Internal(format!("Local provider lock poisoned: {}", e))
        })
    }

    /// Register a tool, replacing any tool with the same name and version
    pub fn add_tool(&self, tool: Tool) -> Result<()> {
        validate_key(&tool)?;
        tracing::debug!(provider = %self.name, tool = %tool.name, version = ?tool.meta.version, "Tool registered");
        let mut state = self.write()?;
        upsert(&mut state.tools, tool);
        Ok(())
    }

    pub fn add_resource(&self, resource: Resource) -> Result<()> {
        validate_key(&resource)?;
        tracing::debug!(provider = %self.name, uri = %resource.uri, "Resource registered");
        let mut state = self.write()?;
        upsert(&mut state.resources, resource);
        Ok(())
    }

    pub fn add_template(&self, template: ResourceTemplate) -> Result<()> {
        validate_key(&template)?;
        tracing::debug!(provider = %self.name, uri_template = %template.uri_template, "Resource template registered");
        let mut state = self.write()?;
        upsert(&mut state.templates, template);
        Ok(())
    }

    pub fn add_prompt(&self, prompt: Prompt) -> Result<()> {
        validate_key(&prompt)?;
        tracing::debug!(provider = %self.name, prompt = %prompt.name, "Prompt registered");
        let mut state = self.write()?;
        upsert(&mut state.prompts, prompt);
        Ok(())
    }

    /// Remove every version (or one version) of a component.
    /// Returns how many entries were removed.
    pub fn remove(&self, kind: ComponentKind, key: &str, version: Option<&str>) -> Result<usize> {
        let mut state = self.write()?;
        let removed = match kind {
            ComponentKind::Tool => retain_others(&mut state.tools, key, version),
            ComponentKind::Resource => retain_others(&mut state.resources, key, version),
            ComponentKind::Template => retain_others(&mut state.templates, key, version),
            ComponentKind::Prompt => retain_others(&mut state.prompts, key, version),
        };
        Ok(removed)
    }

    /// Toggle the `enabled` flag on matching entries. Returns how many changed.
    pub fn set_enabled(
        &self,
        kind: ComponentKind,
        key: &str,
        version: Option<&str>,
        enabled: bool,
    ) -> Result<usize> {
        let mut state = self.write()?;
        let changed = match kind {
            ComponentKind::Tool => toggle(&mut state.tools, key, version, enabled),
            ComponentKind::Resource => toggle(&mut state.resources, key, version, enabled),
            ComponentKind::Template => toggle(&mut state.templates, key, version, enabled),
            ComponentKind::Prompt => toggle(&mut state.prompts, key, version, enabled),
        };
        Ok(changed)
    }

    pub fn enable(&self, kind: ComponentKind, key: &str, version: Option<&str>) -> Result<usize> {
        self.set_enabled(kind, key, version, true)
    }

    pub fn disable(&self, kind: ComponentKind, key: &str, version: Option<&str>) -> Result<usize> {
        self.set_enabled(kind, key, version, false)
    }

    pub fn is_empty(&self) -> Result<bool> {
        let state = self.read()?;
        Ok(state.tools.is_empty()
            && state.resources.is_empty()
            && state.templates.is_empty()
            && state.prompts.is_empty())
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new("local")
    }
}

fn validate_key<T: Component>(component: &T) -> Result<()> {
    if component.key().is_empty() {
        return Err(McpError::Validation(format!(
            "{} name cannot be empty",
            component.kind()
        )));
    }
    Ok(())
}

fn same_entry<T: Component>(item: &T, key: &str, version: &VersionKey) -> bool {
    item.key() == key && item.version_key() == *version
}

fn upsert<T: Component>(items: &mut Vec<T>, component: T) {
    let version = component.version_key();
    match items
        .iter()
        .position(|item| same_entry(item, component.key(), &version))
    {
        Some(i) => items[i] = component,
        None => items.push(component),
    }
}

fn selected<T: Component>(item: &T, key: &str, version: Option<&str>) -> bool {
    item.key() == key
        && version
            .map(|v| item.version_key() == VersionKey::new(Some(v)))
            .unwrap_or(true)
}

fn retain_others<T: Component>(items: &mut Vec<T>, key: &str, version: Option<&str>) -> usize {
    let before = items.len();
    items.retain(|item| !selected(item, key, version));
    before - items.len()
}

fn toggle<T: Component>(items: &mut [T], key: &str, version: Option<&str>, enabled: bool) -> usize {
    let mut changed = 0;
    for item in items.iter_mut().filter(|item| selected(&**item, key, version)) {
        if item.meta().enabled != enabled {
            item.meta_mut().enabled = enabled;
            changed += 1;
        }
    }
    changed
}

fn enabled<T: Component + Clone>(items: &[T]) -> Vec<T> {
    items.iter().filter(|i| i.meta().enabled).cloned().collect()
}

#[async_trait]
impl ToolProvider for LocalProvider {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(enabled(&self.read()?.tools))
    }
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    async fn list_resources(&self) -> Result<Vec<Resource>> {
        Ok(enabled(&self.read()?.resources))
    }
}

#[async_trait]
impl TemplateProvider for LocalProvider {
    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        Ok(enabled(&self.read()?.templates))
    }
}

#[async_trait]
impl PromptProvider for LocalProvider {
    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        Ok(enabled(&self.read()?.prompts))
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PromptResult, ToolResult};
    use crate::types::WithMeta;

    fn tool(name: &str, version: Option<&str>) -> Tool {
        let t = Tool::new(name, |_, _| async { Ok(ToolResult::text("ok")) });
        match version {
            Some(v) => t.with_version(v),
            None => t,
        }
    }

    #[tokio::test]
    async fn test_add_and_list_in_order() {
        let provider = LocalProvider::default();
        provider.add_tool(tool("b", None)).unwrap();
        provider.add_tool(tool("a", None)).unwrap();

        let names: Vec<String> = provider
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_same_version_replaces() {
        let provider = LocalProvider::default();
        provider.add_tool(tool("a", Some("1.0"))).unwrap();
        provider
            .add_tool(tool("a", Some("v1.0")).with_description("new"))
            .unwrap();
        provider.add_tool(tool("a", Some("2.0"))).unwrap();

        let tools = provider.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].meta.description.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_get_returns_highest_version() {
        let provider = LocalProvider::default();
        provider.add_tool(tool("a", Some("1.0"))).unwrap();
        provider.add_tool(tool("a", Some("2.0"))).unwrap();

        let found = provider.get_tool("a", None).await.unwrap().unwrap();
        assert_eq!(found.meta.version.as_deref(), Some("2.0"));
    }

    #[tokio::test]
    async fn test_disable_hides_from_list_and_get() {
        let provider = LocalProvider::default();
        provider.add_tool(tool("a", Some("1.0"))).unwrap();
        provider.add_tool(tool("a", Some("2.0"))).unwrap();

        assert_eq!(provider.disable(ComponentKind::Tool, "a", Some("2.0")).unwrap(), 1);
        let found = provider.get_tool("a", None).await.unwrap().unwrap();
        assert_eq!(found.meta.version.as_deref(), Some("1.0"));

        provider.disable(ComponentKind::Tool, "a", None).unwrap();
        assert!(provider.get_tool("a", None).await.unwrap().is_none());
        assert!(provider.list_tools().await.unwrap().is_empty());

        provider.enable(ComponentKind::Tool, "a", None).unwrap();
        assert_eq!(provider.list_tools().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove() {
        let provider = LocalProvider::default();
        provider.add_tool(tool("a", Some("1.0"))).unwrap();
        provider.add_tool(tool("a", Some("2.0"))).unwrap();
        provider
            .add_prompt(Prompt::new("p", |_| async { Ok(PromptResult::user("hi")) }))
            .unwrap();

        assert_eq!(provider.remove(ComponentKind::Tool, "a", Some("1.0")).unwrap(), 1);
        assert_eq!(provider.remove(ComponentKind::Tool, "a", None).unwrap(), 1);
        assert!(!provider.is_empty().unwrap());
        assert_eq!(provider.remove(ComponentKind::Prompt, "p", None).unwrap(), 1);
        assert!(provider.is_empty().unwrap());
    }

    #[test]
    fn test_unversioned_sorts_below_versioned() {
        let provider = LocalProvider::default();
        provider.add_tool(tool("a", None)).unwrap();
        provider.add_tool(tool("a", Some("0.1"))).unwrap();

        let found = tokio_test::block_on(provider.get_tool("a", None)).unwrap().unwrap();
        assert_eq!(found.meta.version.as_deref(), Some("0.1"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let provider = LocalProvider::default();
        let err = provider.add_tool(tool("", None)).unwrap_err();
        assert!(matches!(err, McpError::Validation(_)));
    }
}
