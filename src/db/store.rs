//! SQLite-backed collaborators: entities, relations and open work items.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::assets::{AssetRef, Entity, EntityStore, OpenWorkItems, WorkItem, WorkItemKind, WorkItemSource};
use crate::error::{ImpactError, Result};
use crate::graph::{Relation, RelationStore};

/// All collaborator traits over one borrowed connection. A request builds one
/// of these inside [`crate::db::Db::with_connection`].
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// Insert or replace an entity record.
    pub fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        let fields = serde_json::to_string(&entity.fields)
            .map_err(|e| ImpactError::Unexpected(format!("Failed to encode fields: {}", e)))?;
        self.conn.execute(
            "INSERT INTO entities (kind, id, name, fields_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind, id) DO UPDATE SET name = excluded.name, fields_json = excluded.fields_json",
            params![entity.kind, entity.id, entity.name, fields],
        )?;
        Ok(())
    }

    pub fn link(&self, owner: &AssetRef, key: &str, target: &AssetRef, position: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO entity_links
                (owner_kind, owner_id, link_key, target_kind, target_id, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![owner.kind, owner.id, key, target.kind, target.id, position],
        )?;
        Ok(())
    }

    pub fn upsert_work_item(&self, asset: &AssetRef, kind: WorkItemKind, item: &WorkItem, open: bool) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO work_items
                (id, item_kind, asset_kind, asset_id, name, status, is_open)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![item.id, kind.as_str(), asset.kind, asset.id, item.name, item.status, open],
        )?;
        Ok(())
    }

    pub fn relation_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM asset_relations", [], |row| row.get(0))?)
    }

    fn relations_where(&self, column_kind: &str, column_id: &str, asset: &AssetRef) -> Result<Vec<Relation>> {
        // Column names are compile-time constants from the callers below.
        let sql = format!(
            "SELECT source_kind, source_id, target_kind, target_id
             FROM asset_relations WHERE {} = ?1 AND {} = ?2 ORDER BY id",
            column_kind, column_id
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let relations = stmt
            .query_map(params![asset.kind, asset.id], relation_from_row)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(relations)
    }
}

fn relation_from_row(row: &Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation::new(
        AssetRef::new(row.get::<_, String>(0)?, row.get(1)?),
        AssetRef::new(row.get::<_, String>(2)?, row.get(3)?),
    ))
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_entity((kind, id, name, fields_json): (String, i64, String, String)) -> Result<Entity> {
    let fields: Map<String, Value> = serde_json::from_str(&fields_json).map_err(|e| {
        ImpactError::Unexpected(format!("Corrupt fields for {}::{}: {}", kind, id, e))
    })?;
    Ok(Entity { kind, id, name, fields })
}

impl EntityStore for SqliteStore<'_> {
    fn load(&self, asset: &AssetRef) -> Result<Option<Entity>> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, id, name, fields_json FROM entities WHERE kind = ?1 AND id = ?2",
                params![asset.kind, asset.id],
                entity_from_row,
            )
            .optional()?;
        row.map(decode_entity).transpose()
    }

    fn related_one(&self, owner: &Entity, key: &str) -> Result<Option<Entity>> {
        Ok(self.related_many(owner, key)?.into_iter().next())
    }

    fn related_many(&self, owner: &Entity, key: &str) -> Result<Vec<Entity>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT e.kind, e.id, e.name, e.fields_json
             FROM entity_links l
             JOIN entities e ON e.kind = l.target_kind AND e.id = l.target_id
             WHERE l.owner_kind = ?1 AND l.owner_id = ?2 AND l.link_key = ?3
             ORDER BY l.position, e.id",
        )?;
        let rows = stmt
            .query_map(params![owner.kind, owner.id, key], entity_from_row)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        rows.into_iter().map(decode_entity).collect()
    }
}

impl RelationStore for SqliteStore<'_> {
    fn outgoing(&self, asset: &AssetRef) -> Result<Vec<Relation>> {
        self.relations_where("source_kind", "source_id", asset)
    }

    fn incoming(&self, asset: &AssetRef) -> Result<Vec<Relation>> {
        self.relations_where("target_kind", "target_id", asset)
    }

    fn contains(&self, relation: &Relation) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM asset_relations
                 WHERE source_kind = ?1 AND source_id = ?2 AND target_kind = ?3 AND target_id = ?4",
                params![relation.source.kind, relation.source.id, relation.target.kind, relation.target.id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert(&self, relation: &Relation) -> Result<bool> {
        // The UNIQUE constraint decides between concurrent identical adds.
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO asset_relations (source_kind, source_id, target_kind, target_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![relation.source.kind, relation.source.id, relation.target.kind, relation.target.id],
        )?;
        Ok(changed > 0)
    }

    fn remove(&self, relation: &Relation) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM asset_relations
             WHERE source_kind = ?1 AND source_id = ?2 AND target_kind = ?3 AND target_id = ?4",
            params![relation.source.kind, relation.source.id, relation.target.kind, relation.target.id],
        )?;
        Ok(changed > 0)
    }
}

impl WorkItemSource for SqliteStore<'_> {
    fn open_items(&self, asset: &AssetRef) -> Result<OpenWorkItems> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT item_kind, id, name, status FROM work_items
             WHERE asset_kind = ?1 AND asset_id = ?2 AND is_open = 1
             ORDER BY item_kind, id",
        )?;
        let rows = stmt
            .query_map(params![asset.kind, asset.id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    WorkItem { id: row.get(1)?, name: row.get(2)?, status: row.get(3)? },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let mut items = OpenWorkItems::default();
        for (kind, item) in rows {
            match WorkItemKind::parse(&kind) {
                Some(kind) => items.push(kind, item),
                None => log::warn!("Ignoring work item {} with unknown kind {}", item.id, kind),
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate::run_migrations;
    use std::path::Path;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, &Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).unwrap();
        conn
    }

    fn entity(kind: &str, id: i64, name: &str) -> Entity {
        Entity { kind: kind.to_string(), id, name: name.to_string(), fields: Map::new() }
    }

    fn rel(a: i64, b: i64) -> Relation {
        Relation::new(AssetRef::new("Computer", a), AssetRef::new("Computer", b))
    }

    #[test]
    fn test_entity_round_trip() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let mut pc = entity("Computer", 1, "srv-web");
        pc.fields.insert("serial".to_string(), Value::from("SN-9"));
        store.upsert_entity(&pc).unwrap();

        let loaded = store.load(&AssetRef::new("Computer", 1)).unwrap().unwrap();
        assert_eq!(loaded, pc);
        assert!(store.load(&AssetRef::new("Computer", 2)).unwrap().is_none());
    }

    #[test]
    fn test_related_entities_ordered_by_position() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let ticket = entity("Ticket", 5, "Outage");
        store.upsert_entity(&ticket).unwrap();
        store.upsert_entity(&entity("User", 2, "bob")).unwrap();
        store.upsert_entity(&entity("User", 1, "alice")).unwrap();
        store.link(&ticket.asset_ref(), "requesters", &AssetRef::new("User", 2), 0).unwrap();
        store.link(&ticket.asset_ref(), "requesters", &AssetRef::new("User", 1), 1).unwrap();
        // Dangling link to a missing entity is dropped by the join
        store.link(&ticket.asset_ref(), "requesters", &AssetRef::new("User", 3), 2).unwrap();

        let names: Vec<_> = store
            .related_many(&ticket, "requesters")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["bob", "alice"]);
        assert_eq!(store.related_one(&ticket, "requesters").unwrap().unwrap().name, "bob");
        assert!(store.related_one(&ticket, "location").unwrap().is_none());
    }

    #[test]
    fn test_relation_insert_and_remove() {
        let conn = conn();
        let store = SqliteStore::new(&conn);

        assert!(store.insert(&rel(1, 2)).unwrap());
        assert!(!store.insert(&rel(1, 2)).unwrap());
        assert!(store.insert(&rel(2, 1)).unwrap());
        assert_eq!(store.relation_count().unwrap(), 2);

        assert_eq!(store.outgoing(&AssetRef::new("Computer", 1)).unwrap(), vec![rel(1, 2)]);
        assert_eq!(store.incoming(&AssetRef::new("Computer", 1)).unwrap(), vec![rel(2, 1)]);
        assert!(store.contains(&rel(2, 1)).unwrap());

        assert!(store.remove(&rel(1, 2)).unwrap());
        assert!(!store.remove(&rel(1, 2)).unwrap());
        assert_eq!(store.relation_count().unwrap(), 1);
    }

    #[test]
    fn test_open_items_skip_closed() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let asset = AssetRef::new("Computer", 1);
        let item = |id: i64| WorkItem { id, name: format!("item-{}", id), status: "New".to_string() };

        store.upsert_work_item(&asset, WorkItemKind::Incident, &item(1), true).unwrap();
        store.upsert_work_item(&asset, WorkItemKind::Incident, &item(2), false).unwrap();
        store.upsert_work_item(&asset, WorkItemKind::Change, &item(3), true).unwrap();

        let items = store.open_items(&asset).unwrap();
        assert_eq!(items.incidents.len(), 1);
        assert_eq!(items.changes[0].id, 3);
        assert!(items.requests.is_empty());
        assert!(store.open_items(&AssetRef::new("Computer", 2)).unwrap().is_empty());
    }
}
