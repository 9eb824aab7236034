//! Version range transform

use super::{CatalogNext, Transform};
use crate::context::DispatchContext;
use crate::error::{McpError, Result};
use crate::types::{Prompt, Resource, ResourceTemplate, Tool};
use crate::version::{VersionSpec, Versioned};
use async_trait::async_trait;

/// Restricts the catalog to versions in `[gte, lt)`.
///
/// Unversioned components always pass. Lookups narrow any requested spec by
/// the range, so "newest" means newest inside the range.
#[derive(Debug, Clone)]
pub struct VersionFilter {
    range: VersionSpec,
}

impl VersionFilter {
    pub fn new(gte: Option<&str>, lt: Option<&str>) -> Result<Self> {
        if gte.is_none() && lt.is_none() {
            return Err(McpError::Validation(
                "VersionFilter needs at least one of gte or lt".to_string(),
            ));
        }
        Ok(Self {
            range: VersionSpec::range(gte.map(str::to_string), lt.map(str::to_string)),
        })
    }

    pub fn range(&self) -> &VersionSpec {
        &self.range
    }

    fn keep<T: Versioned>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| self.range.matches(item.version()))
            .collect()
    }

    fn narrow(&self, requested: Option<&VersionSpec>) -> VersionSpec {
        match requested {
            Some(spec) => spec.intersect(&self.range),
            None => self.range.clone(),
        }
    }

    fn check<T: Versioned>(&self, found: Option<T>) -> Option<T> {
        found.filter(|item| self.range.matches(item.version()))
    }
}

#[async_trait]
impl Transform for VersionFilter {
    fn name(&self) -> &str {
        "version_filter"
    }

    async fn list_tools(&self, _ctx: &DispatchContext, tools: Vec<Tool>) -> Result<Vec<Tool>> {
        Ok(self.keep(tools))
    }

    async fn get_tool(
        &self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Tool>> {
        let spec = self.narrow(version);
        Ok(self.check(next.get_tool(ctx, name, Some(&spec)).await?))
    }

    async fn list_resources(
        &self,
        _ctx: &DispatchContext,
        resources: Vec<Resource>,
    ) -> Result<Vec<Resource>> {
        Ok(self.keep(resources))
    }

    async fn get_resource(
        &self,
        ctx: &DispatchContext,
        uri: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Resource>> {
        let spec = self.narrow(version);
        Ok(self.check(next.get_resource(ctx, uri, Some(&spec)).await?))
    }

    async fn list_resource_templates(
        &self,
        _ctx: &DispatchContext,
        templates: Vec<ResourceTemplate>,
    ) -> Result<Vec<ResourceTemplate>> {
        Ok(self.keep(templates))
    }

    async fn get_resource_template(
        &self,
        ctx: &DispatchContext,
        uri_template: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<ResourceTemplate>> {
        let spec = self.narrow(version);
        Ok(self.check(
            next.get_resource_template(ctx, uri_template, Some(&spec))
                .await?,
        ))
    }

    async fn list_prompts(&self, _ctx: &DispatchContext, prompts: Vec<Prompt>) -> Result<Vec<Prompt>> {
        Ok(self.keep(prompts))
    }

    async fn get_prompt(
        &self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Prompt>> {
        let spec = self.narrow(version);
        Ok(self.check(next.get_prompt(ctx, name, Some(&spec)).await?))
    }
}
