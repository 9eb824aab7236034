//! Transforms: catalog-level interceptors between middleware and registry
//!
//! Where middleware sees messages, transforms see resolved components. A
//! listing flows outward: the registry's full version set passes through the
//! innermost transform first. A lookup flows inward: the outermost transform
//! is asked first and delegates through [`CatalogNext`].

use crate::context::DispatchContext;
use crate::error::Result;
use crate::registry::ComponentRegistry;
use crate::types::{Prompt, Resource, ResourceTemplate, Tool};
use crate::version::VersionSpec;
use async_trait::async_trait;
use std::sync::Arc;

pub mod namespace;
pub mod schema;
pub mod search;
pub mod version_filter;
pub mod visibility;

pub use namespace::Namespace;
pub use schema::{dereference_refs, SchemaDereference};
pub use search::SearchTransform;
pub use version_filter::VersionFilter;
pub use visibility::Visibility;

/// Catalog-level interceptor. Every method defaults to passthrough.
#[async_trait]
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tools(&self, _ctx: &DispatchContext, tools: Vec<Tool>) -> Result<Vec<Tool>> {
        Ok(tools)
    }

    async fn get_tool(
        &self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Tool>> {
        next.get_tool(ctx, name, version).await
    }

    async fn list_resources(
        &self,
        _ctx: &DispatchContext,
        resources: Vec<Resource>,
    ) -> Result<Vec<Resource>> {
        Ok(resources)
    }

    async fn get_resource(
        &self,
        ctx: &DispatchContext,
        uri: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Resource>> {
        next.get_resource(ctx, uri, version).await
    }

    async fn list_resource_templates(
        &self,
        _ctx: &DispatchContext,
        templates: Vec<ResourceTemplate>,
    ) -> Result<Vec<ResourceTemplate>> {
        Ok(templates)
    }

    async fn get_resource_template(
        &self,
        ctx: &DispatchContext,
        uri_template: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<ResourceTemplate>> {
        next.get_resource_template(ctx, uri_template, version).await
    }

    async fn list_prompts(&self, _ctx: &DispatchContext, prompts: Vec<Prompt>) -> Result<Vec<Prompt>> {
        Ok(prompts)
    }

    async fn get_prompt(
        &self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Prompt>> {
        next.get_prompt(ctx, name, version).await
    }
}

/// Continuation for lookups: the remaining transforms, then the registry
#[derive(Clone, Copy)]
pub struct CatalogNext<'a> {
    transforms: &'a [Arc<dyn Transform>],
    registry: &'a ComponentRegistry,
}

impl<'a> CatalogNext<'a> {
    pub fn new(transforms: &'a [Arc<dyn Transform>], registry: &'a ComponentRegistry) -> Self {
        Self {
            transforms,
            registry,
        }
    }

    fn split(self) -> Option<(&'a Arc<dyn Transform>, CatalogNext<'a>)> {
        self.transforms.split_first().map(|(head, rest)| {
            (
                head,
                CatalogNext {
                    transforms: rest,
                    registry: self.registry,
                },
            )
        })
    }

    pub async fn get_tool(
        self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<Tool>> {
        match self.split() {
            Some((head, rest)) => head.get_tool(ctx, name, version, rest).await,
            None => self.registry.get_tool(name, version).await,
        }
    }

    pub async fn get_resource(
        self,
        ctx: &DispatchContext,
        uri: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<Resource>> {
        match self.split() {
            Some((head, rest)) => head.get_resource(ctx, uri, version, rest).await,
            None => self.registry.get_resource(uri, version).await,
        }
    }

    pub async fn get_resource_template(
        self,
        ctx: &DispatchContext,
        uri_template: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<ResourceTemplate>> {
        match self.split() {
            Some((head, rest)) => {
                head.get_resource_template(ctx, uri_template, version, rest)
                    .await
            }
            None => {
                self.registry
                    .get_resource_template(uri_template, version)
                    .await
            }
        }
    }

    pub async fn get_prompt(
        self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
    ) -> Result<Option<Prompt>> {
        match self.split() {
            Some((head, rest)) => head.get_prompt(ctx, name, version, rest).await,
            None => self.registry.get_prompt(name, version).await,
        }
    }
}

/// Ordered transform list, outermost first
#[derive(Clone, Default)]
pub struct TransformChain {
    transforms: Vec<Arc<dyn Transform>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transform: Arc<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn next<'a>(&'a self, registry: &'a ComponentRegistry) -> CatalogNext<'a> {
        CatalogNext::new(&self.transforms, registry)
    }

    pub async fn list_tools(
        &self,
        ctx: &DispatchContext,
        registry: &ComponentRegistry,
    ) -> Result<Vec<Tool>> {
        let mut tools = registry.list_tools().await?;
        for transform in self.transforms.iter().rev() {
            tools = transform.list_tools(ctx, tools).await?;
        }
        Ok(tools)
    }

    pub async fn list_resources(
        &self,
        ctx: &DispatchContext,
        registry: &ComponentRegistry,
    ) -> Result<Vec<Resource>> {
        let mut resources = registry.list_resources().await?;
        for transform in self.transforms.iter().rev() {
            resources = transform.list_resources(ctx, resources).await?;
        }
        Ok(resources)
    }

    pub async fn list_resource_templates(
        &self,
        ctx: &DispatchContext,
        registry: &ComponentRegistry,
    ) -> Result<Vec<ResourceTemplate>> {
        let mut templates = registry.list_resource_templates().await?;
        for transform in self.transforms.iter().rev() {
            templates = transform.list_resource_templates(ctx, templates).await?;
        }
        Ok(templates)
    }

    pub async fn list_prompts(
        &self,
        ctx: &DispatchContext,
        registry: &ComponentRegistry,
    ) -> Result<Vec<Prompt>> {
        let mut prompts = registry.list_prompts().await?;
        for transform in self.transforms.iter().rev() {
            prompts = transform.list_prompts(ctx, prompts).await?;
        }
        Ok(prompts)
    }
}
