//! Component providers: the sources of catalog components
//!
//! Each capability is its own trait so a provider only implements what it
//! serves. `Provider` ties the four together; `AggregateProvider` composes
//! any number of providers and is itself a `Provider`.

use crate::error::Result;
use crate::types::{Component, Prompt, Resource, ResourceTemplate, Tool};
use crate::version::{select_latest, VersionSpec};
use async_trait::async_trait;

pub mod aggregate;
pub mod local;

pub use aggregate::AggregateProvider;
pub use local::LocalProvider;

/// Tool listing and lookup
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Every tool version this provider serves, disabled ones excluded
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(Vec::new())
    }

    /// Highest enabled version of `name` matching `version`
    ///
    /// Default implementation scans `list_tools()`.
    async fn get_tool(&self, name: &str, version: Option<&VersionSpec>) -> Result<Option<Tool>> {
        Ok(resolve(self.list_tools().await?, name, version))
    }
}

/// Resource listing and lookup by URI
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<Resource>> {
        Ok(Vec::new())
    }

    async fn get_resource(
        &self,
        uri: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<Resource>> {
        Ok(resolve(self.list_resources().await?, uri, version))
    }
}

/// Resource template listing and lookup by template string
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        Ok(Vec::new())
    }

    async fn get_resource_template(
        &self,
        uri_template: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<ResourceTemplate>> {
        Ok(resolve(
            self.list_resource_templates().await?,
            uri_template,
            version,
        ))
    }
}

/// Prompt listing and lookup
#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        Ok(Vec::new())
    }

    async fn get_prompt(&self, name: &str, version: Option<&VersionSpec>) -> Result<Option<Prompt>> {
        Ok(resolve(self.list_prompts().await?, name, version))
    }
}

/// A complete component source
pub trait Provider: ToolProvider + ResourceProvider + TemplateProvider + PromptProvider {
    /// Provider name used in logs and for removal
    fn name(&self) -> &str;
}

/// Pick the highest enabled version of `key` satisfying `version`
pub fn resolve<T: Component>(items: Vec<T>, key: &str, version: Option<&VersionSpec>) -> Option<T> {
    select_latest(items.into_iter().filter(|item| {
        item.key() == key
            && item.meta().enabled
            && version.map(|spec| spec.matches(item.version())).unwrap_or(true)
    }))
}
