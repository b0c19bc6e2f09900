//! Parameter schemas: which values a template may reference for a given
//! entity kind, and how to pull them out of the entity store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assets::{AssetRef, Entity, EntityStore};
use crate::Result;

/// Post-processing for a scalar attribute.
pub type Transform = fn(&Value) -> Value;

/// Schemas refer to each other (a location has a parent location), so nested
/// schemas are built on demand.
pub type SchemaProvider = fn() -> TemplateSchema;

#[derive(Clone)]
pub enum ParameterNode {
    /// A scalar field of the entity.
    Attribute {
        key: String,
        label: String,
        transform: Option<Transform>,
    },
    /// A single related entity described by another schema.
    Object {
        key: String,
        label: String,
        schema: SchemaProvider,
    },
    /// A list of related entities; `item_name` is the loop variable offered
    /// to template authors.
    Array {
        key: String,
        item_name: String,
        label: String,
        schema: SchemaProvider,
    },
}

impl ParameterNode {
    pub fn attribute(key: &str, label: &str) -> Self {
        ParameterNode::Attribute {
            key: key.to_string(),
            label: label.to_string(),
            transform: None,
        }
    }

    pub fn transformed(key: &str, label: &str, transform: Transform) -> Self {
        ParameterNode::Attribute {
            key: key.to_string(),
            label: label.to_string(),
            transform: Some(transform),
        }
    }

    pub fn object(key: &str, label: &str, schema: SchemaProvider) -> Self {
        ParameterNode::Object {
            key: key.to_string(),
            label: label.to_string(),
            schema,
        }
    }

    pub fn array(key: &str, item_name: &str, label: &str, schema: SchemaProvider) -> Self {
        ParameterNode::Array {
            key: key.to_string(),
            item_name: item_name.to_string(),
            label: label.to_string(),
            schema,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            ParameterNode::Attribute { key, .. }
            | ParameterNode::Object { key, .. }
            | ParameterNode::Array { key, .. } => key,
        }
    }
}

/// Client-facing description of a parameter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AvailableParameter {
    Attribute {
        key: String,
        label: String,
    },
    Object {
        key: String,
        label: String,
        properties: Vec<AvailableParameter>,
    },
    Array {
        key: String,
        label: String,
        #[serde(rename = "itemName")]
        item_name: String,
        items: Vec<AvailableParameter>,
    },
}

#[derive(Clone)]
pub struct TemplateSchema {
    pub root_key: String,
    pub label: String,
    pub target_kinds: Vec<String>,
    pub parameters: Vec<ParameterNode>,
}

impl TemplateSchema {
    pub fn accepts(&self, kind: &str) -> bool {
        self.target_kinds.iter().any(|k| k == kind)
    }

    /// Describe the schema as a single root object. A nested schema that is
    /// already being expanded higher up is listed without properties.
    pub fn compute_available_parameters(&self) -> AvailableParameter {
        let mut path = vec![self.root_key.clone()];
        AvailableParameter::Object {
            key: self.root_key.clone(),
            label: self.label.clone(),
            properties: self.describe(&mut path),
        }
    }

    fn describe(&self, path: &mut Vec<String>) -> Vec<AvailableParameter> {
        self.parameters
            .iter()
            .map(|node| match node {
                ParameterNode::Attribute { key, label, .. } => AvailableParameter::Attribute {
                    key: key.clone(),
                    label: label.clone(),
                },
                ParameterNode::Object { key, label, schema } => AvailableParameter::Object {
                    key: key.clone(),
                    label: label.clone(),
                    properties: nested(schema(), path),
                },
                ParameterNode::Array { key, item_name, label, schema } => AvailableParameter::Array {
                    key: key.clone(),
                    label: label.clone(),
                    item_name: item_name.clone(),
                    items: nested(schema(), path),
                },
            })
            .collect()
    }

    /// Values of `entity` for this schema. A foreign kind yields an empty map.
    /// With `as_root` the values are wrapped under the schema's root key.
    pub fn get_values(
        &self,
        entity: &Entity,
        as_root: bool,
        store: &dyn EntityStore,
        max_depth: usize,
    ) -> Result<Map<String, Value>> {
        if !self.accepts(&entity.kind) {
            log::warn!(
                "Schema {} does not apply to {} entities",
                self.root_key,
                entity.kind
            );
            return Ok(Map::new());
        }

        let mut path = Vec::new();
        let values = self.collect(entity, store, &mut path, max_depth)?;
        if as_root {
            let mut root = Map::new();
            root.insert(self.root_key.clone(), Value::Object(values));
            Ok(root)
        } else {
            Ok(values)
        }
    }

    fn collect(
        &self,
        entity: &Entity,
        store: &dyn EntityStore,
        path: &mut Vec<AssetRef>,
        remaining: usize,
    ) -> Result<Map<String, Value>> {
        path.push(entity.asset_ref());
        let mut values = Map::new();

        for node in &self.parameters {
            match node {
                ParameterNode::Attribute { key, transform, .. } => {
                    if let Some(raw) = entity.field(key) {
                        let value = match transform {
                            Some(transform) => transform(&raw),
                            None => raw,
                        };
                        values.insert(key.clone(), value);
                    }
                }
                ParameterNode::Object { key, schema, .. } => {
                    if remaining == 0 {
                        continue;
                    }
                    let Some(related) = store.related_one(entity, key)? else {
                        continue;
                    };
                    if path.contains(&related.asset_ref()) {
                        continue;
                    }
                    let nested = schema().collect(&related, store, path, remaining - 1)?;
                    values.insert(key.clone(), Value::Object(nested));
                }
                ParameterNode::Array { key, schema, .. } => {
                    let mut items = Vec::new();
                    if remaining > 0 {
                        let element = schema();
                        for related in store.related_many(entity, key)? {
                            if path.contains(&related.asset_ref()) {
                                continue;
                            }
                            let nested = element.collect(&related, store, path, remaining - 1)?;
                            items.push(Value::Object(nested));
                        }
                    }
                    values.insert(key.clone(), Value::Array(items));
                }
            }
        }

        path.pop();
        Ok(values)
    }
}

fn nested(schema: TemplateSchema, path: &mut Vec<String>) -> Vec<AvailableParameter> {
    if path.contains(&schema.root_key) {
        return Vec::new();
    }
    path.push(schema.root_key.clone());
    let described = schema.describe(path);
    path.pop();
    described
}

/// Schemas in lookup order; the first one targeting a kind wins.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    providers: Vec<SchemaProvider>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: SchemaProvider) {
        self.providers.push(provider);
    }

    pub fn for_kind(&self, kind: &str) -> Option<TemplateSchema> {
        self.providers
            .iter()
            .map(|provider| provider())
            .find(|schema| schema.accepts(kind))
    }

    pub fn by_root_key(&self, root_key: &str) -> Option<TemplateSchema> {
        self.providers
            .iter()
            .map(|provider| provider())
            .find(|schema| schema.root_key == root_key)
    }
}
