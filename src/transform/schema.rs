//! Inline `$ref` definitions in component schemas
//!
//! Some clients cannot follow `#/$defs/...` references. This transform
//! rewrites tool argument and output schemas, and template parameter
//! schemas, so each reference is replaced by the definition it names.

use super::{CatalogNext, Transform};
use crate::context::DispatchContext;
use crate::error::Result;
use crate::types::{ResourceTemplate, Tool};
use crate::version::VersionSpec;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;

const DEFS_KEY: &str = "$defs";
const REF_KEY: &str = "$ref";
const LOCAL_PREFIX: &str = "#/$defs/";

/// Inline every local `$ref` and drop `$defs`.
///
/// A definition that refers to itself anywhere in its own subtree makes the
/// schema come back unchanged. A reference that would re-enter a definition
/// already being expanded on the same branch, or names a missing definition,
/// stays in place and `$defs` is kept. Keys beside a `$ref` are copied
/// without expansion; `$defs` is kept if they hold references.
pub fn dereference_refs(schema: &Value) -> Value {
    let Some(root) = schema.as_object() else {
        return schema.clone();
    };
    let Some(defs) = root.get(DEFS_KEY).and_then(Value::as_object) else {
        return schema.clone();
    };
    if defs.iter().any(|(name, def)| refers_to(def, name)) {
        tracing::debug!("Self-referencing schema definition, leaving schema as is");
        return schema.clone();
    }

    let mut unresolved = false;
    let mut out = Map::new();
    for (key, value) in root {
        if key == DEFS_KEY {
            continue;
        }
        let mut expanding = HashSet::new();
        out.insert(
            key.clone(),
            inline(value, defs, &mut expanding, &mut unresolved),
        );
    }
    if unresolved {
        out.insert(DEFS_KEY.to_string(), Value::Object(defs.clone()));
    }
    Value::Object(out)
}

fn local_ref(value: &Map<String, Value>) -> Option<&str> {
    value
        .get(REF_KEY)
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix(LOCAL_PREFIX))
}

/// Whether `value` contains a local reference to `name` at any depth
fn refers_to(value: &Value, name: &str) -> bool {
    match value {
        Value::Object(map) => {
            local_ref(map) == Some(name) || map.values().any(|v| refers_to(v, name))
        }
        Value::Array(items) => items.iter().any(|v| refers_to(v, name)),
        _ => false,
    }
}

fn has_local_ref(value: &Value) -> bool {
    match value {
        Value::Object(map) => local_ref(map).is_some() || map.values().any(has_local_ref),
        Value::Array(items) => items.iter().any(has_local_ref),
        _ => false,
    }
}

fn inline(
    value: &Value,
    defs: &Map<String, Value>,
    expanding: &mut HashSet<String>,
    unresolved: &mut bool,
) -> Value {
    match value {
        Value::Object(map) => {
            let Some(name) = local_ref(map) else {
                return Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), inline(v, defs, expanding, unresolved)))
                        .collect(),
                );
            };

            let definition = match defs.get(name) {
                Some(def) if !expanding.contains(name) => def,
                _ => {
                    *unresolved = true;
                    return value.clone();
                }
            };

            expanding.insert(name.to_string());
            let mut resolved = inline(definition, defs, expanding, unresolved);
            expanding.remove(name);

            // Keys next to $ref override the definition and are copied as is.
            if let Value::Object(target) = &mut resolved {
                for (k, v) in map.iter().filter(|(k, _)| k.as_str() != REF_KEY) {
                    if has_local_ref(v) {
                        *unresolved = true;
                    }
                    target.insert(k.clone(), v.clone());
                }
            }
            resolved
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| inline(v, defs, expanding, unresolved))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Transform applying [`dereference_refs`] to tool and template schemas
#[derive(Debug, Clone, Default)]
pub struct SchemaDereference;

impl SchemaDereference {
    pub fn new() -> Self {
        Self
    }

    fn tool(mut tool: Tool) -> Tool {
        tool.parameters = dereference_refs(&tool.parameters);
        tool.output_schema = tool.output_schema.as_ref().map(dereference_refs);
        tool
    }

    fn template(mut template: ResourceTemplate) -> ResourceTemplate {
        template.parameters = dereference_refs(&template.parameters);
        template
    }
}

#[async_trait]
impl Transform for SchemaDereference {
    fn name(&self) -> &str {
        "schema_dereference"
    }

    async fn list_tools(&self, _ctx: &DispatchContext, tools: Vec<Tool>) -> Result<Vec<Tool>> {
        Ok(tools.into_iter().map(Self::tool).collect())
    }

    async fn get_tool(
        &self,
        ctx: &DispatchContext,
        name: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<Tool>> {
        Ok(next.get_tool(ctx, name, version).await?.map(Self::tool))
    }

    async fn list_resource_templates(
        &self,
        _ctx: &DispatchContext,
        templates: Vec<ResourceTemplate>,
    ) -> Result<Vec<ResourceTemplate>> {
        Ok(templates.into_iter().map(Self::template).collect())
    }

    async fn get_resource_template(
        &self,
        ctx: &DispatchContext,
        uri_template: &str,
        version: Option<&VersionSpec>,
        next: CatalogNext<'_>,
    ) -> Result<Option<ResourceTemplate>> {
        Ok(next
            .get_resource_template(ctx, uri_template, version)
            .await?
            .map(Self::template))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Request;
    use crate::protocol::ToolResult;
    use crate::registry::ComponentRegistry;
    use crate::transform::TransformChain;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_inlines_acyclic_definition() {
        let schema = json!({
            "$defs": {"Color": {"type": "string", "enum": ["red", "green"]}},
            "properties": {"color": {"$ref": "#/$defs/Color"}}
        });
        let out = dereference_refs(&schema);
        assert!(out.get("$defs").is_none());
        assert_eq!(
            out["properties"]["color"],
            json!({"type": "string", "enum": ["red", "green"]})
        );
    }

    #[test]
    fn test_self_reference_returns_input_unchanged() {
        let schema = json!({
            "$defs": {"Node": {"type": "object", "properties": {"next": {"$ref": "#/$defs/Node"}}}},
            "properties": {"head": {"$ref": "#/$defs/Node"}}
        });
        let out = dereference_refs(&schema);
        assert_eq!(out, schema);
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            serde_json::to_string(&schema).unwrap()
        );
    }

    #[test]
    fn test_mutual_cycle_keeps_ref_and_defs() {
        let schema = json!({
            "$defs": {
                "A": {"type": "object", "properties": {"b": {"$ref": "#/$defs/B"}}},
                "B": {"type": "object", "properties": {"a": {"$ref": "#/$defs/A"}}}
            },
            "properties": {"root": {"$ref": "#/$defs/A"}}
        });
        let out = dereference_refs(&schema);
        assert!(out.get("$defs").is_some());
        assert_eq!(
            out["properties"]["root"]["properties"]["b"]["properties"]["a"],
            json!({"$ref": "#/$defs/A"})
        );
    }

    #[test]
    fn test_missing_definition_kept() {
        let schema = json!({
            "$defs": {"Known": {"type": "integer"}},
            "properties": {
                "a": {"$ref": "#/$defs/Known"},
                "b": {"$ref": "#/$defs/Unknown"}
            }
        });
        let out = dereference_refs(&schema);
        assert_eq!(out["properties"]["a"], json!({"type": "integer"}));
        assert_eq!(out["properties"]["b"], json!({"$ref": "#/$defs/Unknown"}));
        assert_eq!(out["$defs"], schema["$defs"]);
    }

    #[test]
    fn test_siblings_reuse_and_override() {
        let schema = json!({
            "$defs": {"Id": {"type": "string", "description": "identifier"}},
            "properties": {
                "from": {"$ref": "#/$defs/Id"},
                "to": {"$ref": "#/$defs/Id", "description": "target"}
            }
        });
        let out = dereference_refs(&schema);
        assert!(out.get("$defs").is_none());
        assert_eq!(out["properties"]["from"]["description"], "identifier");
        assert_eq!(out["properties"]["to"]["description"], "target");
        assert_eq!(out["properties"]["to"]["type"], "string");
    }

    #[test]
    fn test_sibling_keys_copied_verbatim() {
        let schema = json!({
            "$defs": {
                "Id": {"type": "string"},
                "Tag": {"type": "string", "maxLength": 8}
            },
            "properties": {
                "owner": {
                    "$ref": "#/$defs/Id",
                    "examples": [{"$ref": "#/$defs/Tag"}]
                }
            }
        });
        let out = dereference_refs(&schema);
        assert_eq!(out["properties"]["owner"]["type"], "string");
        assert_eq!(
            out["properties"]["owner"]["examples"],
            json!([{"$ref": "#/$defs/Tag"}])
        );
        assert_eq!(out["$defs"], schema["$defs"]);
    }

    #[test]
    fn test_no_defs_is_identity() {
        let schema = json!({"type": "object", "properties": {"x": {"$ref": "other.json"}}});
        assert_eq!(dereference_refs(&schema), schema);
    }

    #[tokio::test]
    async fn test_transform_rewrites_tool_schemas() {
        let registry = ComponentRegistry::new();
        registry
            .add_tool(
                Tool::new("paint", |_, _| async { Ok(ToolResult::text("ok")) }).with_parameters(
                    json!({
                        "type": "object",
                        "$defs": {"Color": {"type": "string"}},
                        "properties": {"color": {"$ref": "#/$defs/Color"}}
                    }),
                ),
            )
            .unwrap();
        let mut chain = TransformChain::new();
        chain.push(Arc::new(SchemaDereference::new()));
        let ctx = DispatchContext::new("s", Request::ListTools);

        let listed = chain.list_tools(&ctx, &registry).await.unwrap();
        assert_eq!(listed[0].parameters["properties"]["color"], json!({"type": "string"}));

        let got = chain
            .next(&registry)
            .get_tool(&ctx, "paint", None)
            .await
            .unwrap()
            .unwrap();
        assert!(got.parameters.get("$defs").is_none());
    }
}
