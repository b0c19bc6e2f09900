//! In-memory collaborators for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::assets::{AssetRef, Entity, EntityStore, OpenWorkItems, WorkItem, WorkItemKind, WorkItemSource};
use crate::graph::{Relation, RelationStore};
use crate::{ImpactError, Result};

#[derive(Default)]
pub struct MemoryStore {
    entities: RefCell<HashMap<String, Entity>>,
    relations: RefCell<Vec<Relation>>,
    links: RefCell<HashMap<(String, String), Vec<AssetRef>>>,
    work_items: RefCell<HashMap<String, OpenWorkItems>>,
    fail_work_items: Cell<bool>,
    failing_asset: RefCell<Option<AssetRef>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_computers(ids: &[i64]) -> Self {
        let store = Self::new();
        for id in ids {
            store.add_entity("Computer", *id, &format!("computer-{}", id));
        }
        store
    }

    pub fn add_entity(&self, kind: &str, id: i64, name: &str) {
        self.add_entity_with_fields(kind, id, name, Map::new());
    }

    pub fn add_entity_with_fields(&self, kind: &str, id: i64, name: &str, fields: Map<String, Value>) {
        let entity = Entity {
            kind: kind.to_string(),
            id,
            name: name.to_string(),
            fields,
        };
        self.entities.borrow_mut().insert(entity.asset_ref().node_id(), entity);
    }

    /// Panics when the entity was never added.
    pub fn entity(&self, kind: &str, id: i64) -> Entity {
        self.entities.borrow()[&AssetRef::new(kind, id).node_id()].clone()
    }

    pub fn relate(&self, source: (&str, i64), target: (&str, i64)) {
        self.relations.borrow_mut().push(Relation::new(
            AssetRef::new(source.0, source.1),
            AssetRef::new(target.0, target.1),
        ));
    }

    pub fn link(&self, owner: (&str, i64), key: &str, target: (&str, i64)) {
        self.links
            .borrow_mut()
            .entry((AssetRef::new(owner.0, owner.1).node_id(), key.to_string()))
            .or_default()
            .push(AssetRef::new(target.0, target.1));
    }

    pub fn add_work_item(&self, asset: (&str, i64), kind: WorkItemKind, item: WorkItem) {
        self.work_items
            .borrow_mut()
            .entry(AssetRef::new(asset.0, asset.1).node_id())
            .or_default()
            .push(kind, item);
    }

    pub fn fail_work_items(&self, fail: bool) {
        self.fail_work_items.set(fail);
    }

    /// Relation writes touching `asset` fail from now on.
    pub fn fail_writes_to(&self, asset: (&str, i64)) {
        *self.failing_asset.borrow_mut() = Some(AssetRef::new(asset.0, asset.1));
    }

    fn check_writable(&self, relation: &Relation) -> Result<()> {
        match self.failing_asset.borrow().as_ref() {
            Some(asset) if &relation.source == asset || &relation.target == asset => {
                Err(ImpactError::Unexpected("relation backend offline".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn relation_count(&self) -> usize {
        self.relations.borrow().len()
    }
}

impl EntityStore for MemoryStore {
    fn load(&self, asset: &AssetRef) -> Result<Option<Entity>> {
        Ok(self.entities.borrow().get(&asset.node_id()).cloned())
    }

    fn related_one(&self, owner: &Entity, key: &str) -> Result<Option<Entity>> {
        Ok(self.related_many(owner, key)?.into_iter().next())
    }

    fn related_many(&self, owner: &Entity, key: &str) -> Result<Vec<Entity>> {
        let links = self.links.borrow();
        let Some(targets) = links.get(&(owner.asset_ref().node_id(), key.to_string())) else {
            return Ok(vec![]);
        };
        let entities = self.entities.borrow();
        Ok(targets
            .iter()
            .filter_map(|t| entities.get(&t.node_id()).cloned())
            .collect())
    }
}

impl RelationStore for MemoryStore {
    fn outgoing(&self, asset: &AssetRef) -> Result<Vec<Relation>> {
        Ok(self
            .relations
            .borrow()
            .iter()
            .filter(|r| &r.source == asset)
            .cloned()
            .collect())
    }

    fn incoming(&self, asset: &AssetRef) -> Result<Vec<Relation>> {
        Ok(self
            .relations
            .borrow()
            .iter()
            .filter(|r| &r.target == asset)
            .cloned()
            .collect())
    }

    fn contains(&self, relation: &Relation) -> Result<bool> {
        Ok(self.relations.borrow().contains(relation))
    }

    fn insert(&self, relation: &Relation) -> Result<bool> {
        self.check_writable(relation)?;
        if self.contains(relation)? {
            return Ok(false);
        }
        self.relations.borrow_mut().push(relation.clone());
        Ok(true)
    }

    fn remove(&self, relation: &Relation) -> Result<bool> {
        self.check_writable(relation)?;
        let mut relations = self.relations.borrow_mut();
        let before = relations.len();
        relations.retain(|r| r != relation);
        Ok(relations.len() != before)
    }
}

impl WorkItemSource for MemoryStore {
    fn open_items(&self, asset: &AssetRef) -> Result<OpenWorkItems> {
        if self.fail_work_items.get() {
            return Err(ImpactError::Unexpected("work item backend offline".to_string()));
        }
        Ok(self
            .work_items
            .borrow()
            .get(&asset.node_id())
            .cloned()
            .unwrap_or_default())
    }
}
