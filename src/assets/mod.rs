//! Assets and the passive collaborators that describe them.
//!
//! Entities (assets, tickets, users, locations...) live outside the graph core.
//! They are reached through [`EntityStore`] (load by kind + id, related-entity
//! lookups) and [`WorkItemSource`] (open incidents/requests/changes/problems).

mod registry;

pub use registry::{AssetGate, KindDescriptor, KindRegistry};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{ImpactError, Result};

/// Identity of any entity participating in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetRef {
    pub kind: String,
    pub id: i64,
}

impl AssetRef {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    /// Graph node id: `kind::id`.
    pub fn node_id(&self) -> String {
        format!("{}::{}", self.kind, self.id)
    }

    /// Parse a `kind::id` node id back into a reference.
    pub fn from_node_id(node_id: &str) -> Result<Self> {
        let (kind, id) = node_id
            .rsplit_once("::")
            .ok_or_else(|| ImpactError::Validation(format!("Malformed node id: {}", node_id)))?;
        if kind.is_empty() {
            return Err(ImpactError::Validation(format!("Malformed node id: {}", node_id)));
        }
        let id = id
            .parse::<i64>()
            .map_err(|_| ImpactError::Validation(format!("Malformed node id: {}", node_id)))?;
        Ok(Self::new(kind, id))
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.kind, self.id)
    }
}

/// A loaded entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: String,
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Entity {
    pub fn asset_ref(&self) -> AssetRef {
        AssetRef::new(self.kind.clone(), self.id)
    }

    /// Read a scalar field. `id`, `name` and `itemtype` come from the record
    /// itself, everything else from the free-form field map.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "id" => Some(Value::from(self.id)),
            "name" => Some(Value::String(self.name.clone())),
            "itemtype" => Some(Value::String(self.kind.clone())),
            other => self.fields.get(other).cloned(),
        }
    }
}

/// Entity persistence collaborator.
pub trait EntityStore {
    /// Load an entity by kind and id. `Ok(None)` when it does not exist.
    fn load(&self, asset: &AssetRef) -> Result<Option<Entity>>;

    /// Single related entity under `key` (e.g. a ticket's location).
    fn related_one(&self, owner: &Entity, key: &str) -> Result<Option<Entity>>;

    /// Ordered related entities under `key` (e.g. a ticket's requesters).
    fn related_many(&self, owner: &Entity, key: &str) -> Result<Vec<Entity>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemKind {
    Incident,
    Request,
    Change,
    Problem,
}

impl WorkItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemKind::Incident => "incident",
            WorkItemKind::Request => "request",
            WorkItemKind::Change => "change",
            WorkItemKind::Problem => "problem",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "incident" => Some(WorkItemKind::Incident),
            "request" => Some(WorkItemKind::Request),
            "change" => Some(WorkItemKind::Change),
            "problem" => Some(WorkItemKind::Problem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub name: String,
    pub status: String,
}

/// Open work items attached to one asset, shown next to its graph node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenWorkItems {
    #[serde(default)]
    pub incidents: Vec<WorkItem>,
    #[serde(default)]
    pub requests: Vec<WorkItem>,
    #[serde(default)]
    pub changes: Vec<WorkItem>,
    #[serde(default)]
    pub problems: Vec<WorkItem>,
}

impl OpenWorkItems {
    pub fn push(&mut self, kind: WorkItemKind, item: WorkItem) {
        match kind {
            WorkItemKind::Incident => self.incidents.push(item),
            WorkItemKind::Request => self.requests.push(item),
            WorkItemKind::Change => self.changes.push(item),
            WorkItemKind::Problem => self.problems.push(item),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
            && self.requests.is_empty()
            && self.changes.is_empty()
            && self.problems.is_empty()
    }
}

/// Open work item lookup collaborator.
pub trait WorkItemSource {
    fn open_items(&self, asset: &AssetRef) -> Result<OpenWorkItems>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_round_trip() {
        let asset = AssetRef::new("Computer", 42);
        assert_eq!(asset.node_id(), "Computer::42");
        assert_eq!(AssetRef::from_node_id("Computer::42").unwrap(), asset);
    }

    #[test]
    fn test_node_id_rejects_garbage() {
        assert!(AssetRef::from_node_id("Computer").is_err());
        assert!(AssetRef::from_node_id("::4").is_err());
        assert!(AssetRef::from_node_id("Computer::abc").is_err());
    }

    #[test]
    fn test_entity_field_lookup() {
        let mut fields = Map::new();
        fields.insert("serial".to_string(), Value::from("SN-1"));
        let entity = Entity {
            kind: "Computer".to_string(),
            id: 3,
            name: "srv-db".to_string(),
            fields,
        };
        assert_eq!(entity.field("id"), Some(Value::from(3)));
        assert_eq!(entity.field("name"), Some(Value::from("srv-db")));
        assert_eq!(entity.field("itemtype"), Some(Value::from("Computer")));
        assert_eq!(entity.field("serial"), Some(Value::from("SN-1")));
        assert_eq!(entity.field("missing"), None);
    }

    #[test]
    fn test_open_work_items_push() {
        let mut items = OpenWorkItems::default();
        assert!(items.is_empty());
        items.push(
            WorkItemKind::Problem,
            WorkItem { id: 1, name: "Disk".to_string(), status: "New".to_string() },
        );
        assert_eq!(items.problems.len(), 1);
        assert!(!items.is_empty());
    }
}
