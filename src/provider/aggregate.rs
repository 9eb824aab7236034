//! Aggregate provider: many providers presented as one
//!
//! Listing and lookup both fan out to every provider concurrently. Lists keep
//! whatever succeeded; lookups return the highest version found anywhere,
//! the earliest provider winning a tie. A failing provider is logged and
//! skipped in both cases.

use super::{PromptProvider, Provider, ResourceProvider, TemplateProvider, ToolProvider};
use crate::error::Result;
use crate::types::{Component, ComponentKind, Prompt, Resource, ResourceTemplate, Tool};
use crate::version::VersionSpec;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

/// Composite provider; itself a `Provider`, so aggregates nest
#[derive(Clone)]
pub struct AggregateProvider {
    name: String,
    providers: Vec<Arc<dyn Provider>>,
}

impl AggregateProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
        }
    }

    pub fn from_providers(name: impl Into<String>, providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            name: name.into(),
            providers,
        }
    }

    pub fn push(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push(provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.push(provider);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Merge per-provider results in registration order, dropping failures
    fn merge<T>(&self, kind: ComponentKind, results: Vec<Result<Vec<T>>>) -> Vec<T> {
        let mut merged = Vec::new();
        for (provider, result) in self.providers.iter().zip(results) {
            match result {
                Ok(items) => merged.extend(items),
                Err(e) => {
                    tracing::warn!(
                        aggregate = %self.name,
                        provider = %provider.name(),
                        kind = %kind,
                        error = %e,
                        "Provider listing failed, skipping its components"
                    );
                }
            }
        }
        merged
    }

    fn lookup_failed(&self, provider: &dyn Provider, kind: ComponentKind, key: &str, error: &dyn std::fmt::Display) {
        tracing::warn!(
            aggregate = %self.name,
            provider = %provider.name(),
            kind = %kind,
            key = %key,
            error = %error,
            "Provider lookup failed, ignoring its answer"
        );
    }

    /// Highest version among per-provider lookup hits; ties keep the earlier provider
    fn newest<T: Component>(
        &self,
        kind: ComponentKind,
        key: &str,
        results: Vec<Result<Option<T>>>,
    ) -> Option<T> {
        let mut best: Option<T> = None;
        for (provider, result) in self.providers.iter().zip(results) {
            match result {
                Ok(Some(found)) => {
                    let newer = best
                        .as_ref()
                        .map(|current| found.version_key() > current.version_key())
                        .unwrap_or(true);
                    if newer {
                        best = Some(found);
                    }
                }
                Ok(None) => {}
                Err(e) => self.lookup_failed(provider.as_ref(), kind, key, &e),
            }
        }
        best
    }
}

#[async_trait]
impl ToolProvider for AggregateProvider {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let results = join_all(self.providers.iter().map(|p| p.list_tools())).await;
        Ok(self.merge(ComponentKind::Tool, results))
    }

    async fn get_tool(&self, name: &str, version: Option<&VersionSpec>) -> Result<Option<Tool>> {
        let results = join_all(self.providers.iter().map(|p| p.get_tool(name, version))).await;
        Ok(self.newest(ComponentKind::Tool, name, results))
    }
}

#[async_trait]
impl ResourceProvider for AggregateProvider {
    async fn list_resources(&self) -> Result<Vec<Resource>> {
        let results = join_all(self.providers.iter().map(|p| p.list_resources())).await;
        Ok(self.merge(ComponentKind::Resource, results))
    }

    async fn get_resource(
        &self,
        uri: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<Resource>> {
        let results = join_all(self.providers.iter().map(|p| p.get_resource(uri, version))).await;
        Ok(self.newest(ComponentKind::Resource, uri, results))
    }
}

#[async_trait]
impl TemplateProvider for AggregateProvider {
    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        let results = join_all(self.providers.iter().map(|p| p.list_resource_templates())).await;
        Ok(self.merge(ComponentKind::Template, results))
    }

    async fn get_resource_template(
        &self,
        uri_template: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<ResourceTemplate>> {
        let lookups = self
            .providers
            .iter()
            .map(|p| p.get_resource_template(uri_template, version));
        let results = join_all(lookups).await;
        Ok(self.newest(ComponentKind::Template, uri_template, results))
    }
}

#[async_trait]
impl PromptProvider for AggregateProvider {
    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let results = join_all(self.providers.iter().map(|p| p.list_prompts())).await;
        Ok(self.merge(ComponentKind::Prompt, results))
    }

    async fn get_prompt(&self, name: &str, version: Option<&VersionSpec>) -> Result<Option<Prompt>> {
        let results = join_all(self.providers.iter().map(|p| p.get_prompt(name, version))).await;
        Ok(self.newest(ComponentKind::Prompt, name, results))
    }
}

impl Provider for AggregateProvider {
    fn name(&self) -> &str {
        &self.name
    }
}
