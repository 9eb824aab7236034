//! Component registry: the server-owned view over all providers
//!
//! Direct registrations land in a built-in `LocalProvider` that always sits
//! first; further providers are appended in registration order. Lookups and
//! listings go through an `AggregateProvider` built from a snapshot of the
//! provider list, so no lock is held across provider calls.
//!
//! `enable`/`disable` work by key across every provider. A disabled key is
//! absent from listings and lookups, so calling it is indistinguishable from
//! calling something that was never registered. Each mutation bumps the
//! registry generation.

use crate::error::{McpError, Result};
use crate::provider::{
    AggregateProvider, LocalProvider, PromptProvider, Provider, ResourceProvider,
    TemplateProvider, ToolProvider,
};
use crate::types::{Component, ComponentKind, Prompt, Resource, ResourceTemplate, Tool};
use crate::version::{VersionSpec, Versioned};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct RegistryState {
    providers: Vec<Arc<dyn Provider>>,
    disabled: HashSet<(ComponentKind, String)>,
    generation: u64,
}

/// Versioned catalog over a set of providers
pub struct ComponentRegistry {
    local: Arc<LocalProvider>,
    state: RwLock<RegistryState>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        let local = Arc::new(LocalProvider::new("local"));
        let providers: Vec<Arc<dyn Provider>> = vec![local.clone()];
        Self {
            local,
            state: RwLock::new(RegistryState {
                providers,
                disabled: HashSet::new(),
                generation: 0,
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|e| McpError::Internal(format!("Registry lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|e| McpError::Internal(format!("Registry lock poisoned: {}", e)))
    }

    fn bump(&self) -> Result<()> {
        self.write()?.generation += 1;
        Ok(())
    }

    /// Provider for direct registrations
    pub fn local(&self) -> &LocalProvider {
        &self.local
    }

    pub fn add_tool(&self, tool: Tool) -> Result<()> {
        self.local.add_tool(tool)?;
        self.bump()
    }

    pub fn add_resource(&self, resource: Resource) -> Result<()> {
        self.local.add_resource(resource)?;
        self.bump()
    }

    pub fn add_template(&self, template: ResourceTemplate) -> Result<()> {
        self.local.add_template(template)?;
        self.bump()
    }

    pub fn add_prompt(&self, prompt: Prompt) -> Result<()> {
        self.local.add_prompt(prompt)?;
        self.bump()
    }

    /// Append a provider; names must be unique
    pub fn add_provider(&self, provider: Arc<dyn Provider>) -> Result<()> {
        let mut state = self.write()?;
        if state.providers.iter().any(|p| p.name() == provider.name()) {
            return Err(McpError::Config(format!(
                "Provider '{}' is already registered",
                provider.name()
            )));
        }
        tracing::info!(provider = %provider.name(), "Provider registered");
        state.providers.push(provider);
        state.generation += 1;
        Ok(())
    }

    /// Remove a provider by name, dropping its components from the catalog
    pub fn remove_provider(&self, name: &str) -> Result<bool> {
        if name == self.local.name() {
            return Err(McpError::Config(
                "The local provider cannot be removed".to_string(),
            ));
        }
        let mut state = self.write()?;
        let before = state.providers.len();
        state.providers.retain(|p| p.name() != name);
        let removed = state.providers.len() != before;
        if removed {
            state.generation += 1;
            tracing::info!(provider = %name, "Provider removed");
        }
        Ok(removed)
    }

    pub fn provider_names(&self) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .providers
            .iter()
            .map(|p| p.name().to_string())
            .collect())
    }

    /// Hide every version of a component from listings and lookups
    pub fn disable(&self, kind: ComponentKind, key: &str) -> Result<()> {
        let mut state = self.write()?;
        if state.disabled.insert((kind, key.to_string())) {
            state.generation += 1;
            tracing::debug!(kind = %kind, key = %key, "Component disabled");
        }
        Ok(())
    }

    pub fn enable(&self, kind: ComponentKind, key: &str) -> Result<()> {
        let mut state = self.write()?;
        if state.disabled.remove(&(kind, key.to_string())) {
            state.generation += 1;
            tracing::debug!(kind = %kind, key = %key, "Component enabled");
        }
        Ok(())
    }

    pub fn is_disabled(&self, kind: ComponentKind, key: &str) -> Result<bool> {
        Ok(self.read()?.disabled.contains(&(kind, key.to_string())))
    }

    /// Monotonic counter bumped by every registration change
    pub fn generation(&self) -> Result<u64> {
        Ok(self.read()?.generation)
    }

    /// Snapshot of the providers and disabled keys
    fn snapshot(&self) -> Result<(AggregateProvider, HashSet<(ComponentKind, String)>)> {
        let state = self.read()?;
        Ok((
            AggregateProvider::from_providers("registry", state.providers.clone()),
            state.disabled.clone(),
        ))
    }

    fn visible<T: Component>(items: Vec<T>, disabled: &HashSet<(ComponentKind, String)>) -> Vec<T> {
        if disabled.is_empty() {
            return items;
        }
        items
            .into_iter()
            .filter(|item| !disabled.contains(&(item.kind(), item.key().to_string())))
            .collect()
    }

    // ------------------------------------------------------------------
    // Catalog access: full version sets for lists, newest match for gets
    // ------------------------------------------------------------------

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let (aggregate, disabled) = self.snapshot()?;
        Ok(Self::visible(aggregate.list_tools().await?, &disabled))
    }

    pub async fn get_tool(&self, name: &str, version: Option<&VersionSpec>) -> Result<Option<Tool>> {
        let (aggregate, disabled) = self.snapshot()?;
        if disabled.contains(&(ComponentKind::Tool, name.to_string())) {
            return Ok(None);
        }
        aggregate.get_tool(name, version).await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let (aggregate, disabled) = self.snapshot()?;
        Ok(Self::visible(aggregate.list_resources().await?, &disabled))
    }

    pub async fn get_resource(
        &self,
        uri: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<Resource>> {
        let (aggregate, disabled) = self.snapshot()?;
        if disabled.contains(&(ComponentKind::Resource, uri.to_string())) {
            return Ok(None);
        }
        aggregate.get_resource(uri, version).await
    }

    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        let (aggregate, disabled) = self.snapshot()?;
        Ok(Self::visible(aggregate.list_resource_templates().await?, &disabled))
    }

    pub async fn get_resource_template(
        &self,
        uri_template: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<ResourceTemplate>> {
        let (aggregate, disabled) = self.snapshot()?;
        if disabled.contains(&(ComponentKind::Template, uri_template.to_string())) {
            return Ok(None);
        }
        aggregate.get_resource_template(uri_template, version).await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let (aggregate, disabled) = self.snapshot()?;
        Ok(Self::visible(aggregate.list_prompts().await?, &disabled))
    }

    pub async fn get_prompt(&self, name: &str, version: Option<&VersionSpec>) -> Result<Option<Prompt>> {
        let (aggregate, disabled) = self.snapshot()?;
        if disabled.contains(&(ComponentKind::Prompt, name.to_string())) {
            return Ok(None);
        }
        aggregate.get_prompt(name, version).await
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the template serving `uri` among `templates`, preferring the newest
/// version of the first matching template key.
pub fn match_template(
    templates: Vec<ResourceTemplate>,
    uri: &str,
) -> Option<(ResourceTemplate, HashMap<String, String>)> {
    let mut best: Option<(ResourceTemplate, HashMap<String, String>)> = None;
    for template in templates {
        let Some(params) = template.matches(uri) else {
            continue;
        };
        let replace = match &best {
            Some((current, _)) => {
                current.uri_template == template.uri_template
                    && template.version_key() > current.version_key()
            }
            None => true,
        };
        if replace {
            best = Some((template, params));
        }
    }
    best
}
