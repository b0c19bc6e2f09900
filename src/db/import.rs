//! Bulk import of a JSON dataset: entities, links, work items and relations.
//!
//! Relations go through the same validated path as interactive mutations, so
//! a dataset can never introduce self-loops, duplicates or dangling endpoints.

use rusqlite::Connection;
use serde::Deserialize;

use crate::assets::{AssetGate, AssetRef, Entity, KindRegistry, WorkItem, WorkItemKind};
use crate::db::SqliteStore;
use crate::error::Result;
use crate::graph::{add_relation, audit, DeltaAction, DeltaOperation, MutationOutcome, Relation};

#[derive(Debug, Clone, Deserialize)]
pub struct LinkRecord {
    pub owner: AssetRef,
    pub key: String,
    pub targets: Vec<AssetRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkItemRecord {
    pub asset: AssetRef,
    pub kind: WorkItemKind,
    #[serde(flatten)]
    pub item: WorkItem,
    #[serde(default = "default_open")]
    pub open: bool,
}

fn default_open() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub links: Vec<LinkRecord>,
    #[serde(default)]
    pub work_items: Vec<WorkItemRecord>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub entities: usize,
    pub links: usize,
    pub work_items: usize,
    pub relations: usize,
    pub rejected_relations: usize,
}

/// Import `dataset` in one transaction. Rejected relations are counted and
/// audited, not fatal.
pub fn import_dataset(
    conn: &mut Connection,
    dataset: &Dataset,
    registry: &KindRegistry,
    allowed_kinds: &[String],
) -> Result<ImportStats> {
    let tx = conn.transaction()?;
    let mut stats = ImportStats::default();
    {
        let store = SqliteStore::new(&tx);

        for entity in &dataset.entities {
            store.upsert_entity(entity)?;
            stats.entities += 1;
        }

        for link in &dataset.links {
            for (position, target) in link.targets.iter().enumerate() {
                store.link(&link.owner, &link.key, target, position as i64)?;
                stats.links += 1;
            }
        }

        for record in &dataset.work_items {
            store.upsert_work_item(&record.asset, record.kind, &record.item, record.open)?;
            stats.work_items += 1;
        }

        let gate = AssetGate::new(registry, allowed_kinds, &store);
        for relation in &dataset.relations {
            let operation = DeltaOperation::new(DeltaAction::Add, relation);
            let outcome = add_relation(&store, &gate, &operation)?;
            match &outcome {
                MutationOutcome::Applied => {
                    audit::log_operation(&tx, &operation, true, None)?;
                    stats.relations += 1;
                }
                MutationOutcome::Rejected(reason) => {
                    log::warn!("Skipping relation {}: {}", relation.edge_id(), reason);
                    audit::log_operation(&tx, &operation, false, Some(&reason.to_string()))?;
                    stats.rejected_relations += 1;
                }
                MutationOutcome::Skipped | MutationOutcome::Failed(_) => {}
            }
        }
    }
    tx.commit()?;

    log::info!(
        "Imported {} entities, {} links, {} work items, {} relations ({} rejected)",
        stats.entities,
        stats.links,
        stats.work_items,
        stats.relations,
        stats.rejected_relations
    );
    Ok(stats)
}
