//! Name prefixing for mounted catalogs

use super::{CatalogNext, Transform};
use crate::context::DispatchContext;
use crate::error::Result;
use crate::types::{Prompt, Tool};
use crate::version::VersionSpec;
use async_trait::async_trait;

/// Exposes tools and prompts as `{prefix}_{name}`.
///
/// Names without the prefix are not found through this transform.
#[derive(Debug, Clone)]
pub struct Namespace {
    prefix: String,
    name: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            name: format!("namespace:{}", prefix),
            prefix,
        }
    }

    fn outer(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn inner<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
    }
}

#[async_trait]
impl Transform for Namespace {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self, _ctx: &DispatchContext, tools: Vec<Tool>) -> Result<Vec<Tool>> {
        Ok(tools
            .into_iter()
            .map(|mut t| {
                t.name = self.outer(&t.name);
                t
            })
            .collect())
    }

    async fn get_tool(
        &self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Tool>> {
        let Some(inner) = self.inner(name) else {
            return Ok(None);
        };
        Ok(next.get_tool(ctx, inner, version).await?.map(|mut t| {
            t.name = name.to_string();
            t
        }))
    }

    async fn list_prompts(&self, _ctx: &DispatchContext, prompts: Vec<Prompt>) -> Result<Vec<Prompt>> {
        Ok(prompts
            .into_iter()
            .map(|mut p| {
                p.name = self.outer(&p.name);
                p
            })
            .collect())
    }

    async fn get_prompt(
        &self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Prompt>> {
        let Some(inner) = self.inner(name) else {
            return Ok(None);
        };
        Ok(next.get_prompt(ctx, inner, version).await?.map(|mut p| {
            p.name = name.to_string();
            p
        }))
    }
}
