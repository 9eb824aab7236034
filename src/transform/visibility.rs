//! Key and tag based visibility

use super::{CatalogNext, Transform};
use crate::context::DispatchContext;
use crate::error::Result;
use crate::types::{Component, Prompt, Resource, ResourceTemplate, Tool};
use crate::version::VersionSpec;
use async_trait::async_trait;
use std::collections::HashSet;

/// Hides components from both listings and lookups.
///
/// A component is hidden when its key is in `hide_keys`, when it carries any
/// tag in `hide_tags`, or when `only_tags` is non-empty and it carries none
/// of them.
#[derive(Debug, Clone, Default)]
pub struct Visibility {
    hide_keys: HashSet<String>,
    hide_tags: HashSet<String>,
    only_tags: HashSet<String>,
}

impl Visibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hide_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hide_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn hide_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hide_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn only_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn is_visible(&self, component: &dyn Component) -> bool {
        if self.hide_keys.contains(component.key()) {
            return false;
        }
        let tags = &component.meta().tags;
        if tags.iter().any(|t| self.hide_tags.contains(t)) {
            return false;
        }
        self.only_tags.is_empty() || tags.iter().any(|t| self.only_tags.contains(t))
    }

    fn keep<T: Component>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().filter(|c| self.is_visible(c)).collect()
    }

    fn check<T: Component>(&self, found: Option<T>) -> Option<T> {
        found.filter(|c| self.is_visible(c))
    }
}

#[async_trait]
impl Transform for Visibility {
    fn name(&self) -> &str {
        "visibility"
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
        Ok(self.check(next.get_tool(ctx, name, version).await?))
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
        Ok(self.check(next.get_resource(ctx, uri, version).await?))
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
        Ok(self.check(
            next.get_resource_template(ctx, uri_template, version)
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
        Ok(self.check(next.get_prompt(ctx, name, version).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Request;
    use crate::protocol::ToolResult;
    use crate::registry::ComponentRegistry;
    use crate::transform::TransformChain;
    use crate::types::WithMeta;
    use std::sync::Arc;

    fn tool(name: &str, tags: &[&str]) -> Tool {
        Tool::new(name, |_, _| async { Ok(ToolResult::text("ok")) }).with_tags(tags.iter().copied())
    }

    #[test]
    fn test_rules() {
        let hidden_key = Visibility::new().hide_keys(["secret"]);
        assert!(!hidden_key.is_visible(&tool("secret", &[])));
        assert!(hidden_key.is_visible(&tool("open", &[])));

        let hidden_tag = Visibility::new().hide_tags(["internal"]);
        assert!(!hidden_tag.is_visible(&tool("a", &["internal", "math"])));

        let only = Visibility::new().only_tags(["math"]);
        assert!(only.is_visible(&tool("a", &["math"])));
        assert!(!only.is_visible(&tool("b", &["text"])));
        assert!(!only.is_visible(&tool("c", &[])));
    }

    #[tokio::test]
    async fn test_hidden_absent_from_list_and_get() {
        let registry = ComponentRegistry::new();
        registry.add_tool(tool("public", &[])).unwrap();
        registry.add_tool(tool("debug", &["internal"])).unwrap();
        let mut chain = TransformChain::new();
        chain.push(Arc::new(Visibility::new().hide_tags(["internal"])));
        let ctx = DispatchContext::new("s", Request::ListTools);

        let listed = chain.list_tools(&ctx, &registry).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(chain
            .next(&registry)
            .get_tool(&ctx, "debug", None)
            .await
            .unwrap()
            .is_none());
    }
}
