//! Server-side graph construction from the relation store.

use std::collections::HashMap;

use crate::assets::{AssetGate, AssetRef, Entity, OpenWorkItems, WorkItemSource};
use crate::graph::traversal::{explore, Direction};
use crate::graph::{GraphEdge, GraphNode, ImpactGraph, RelationStore};
use crate::Result;

/// Builds the impact graph around a start asset. Stateless between calls:
/// every build re-derives the graph from the relation store.
pub struct GraphBuilder<'a> {
    relations: &'a dyn RelationStore,
    gate: &'a AssetGate<'a>,
    work_items: Option<&'a dyn WorkItemSource>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(relations: &'a dyn RelationStore, gate: &'a AssetGate<'a>) -> Self {
        Self {
            relations,
            gate,
            work_items: None,
        }
    }

    pub fn with_work_items(mut self, source: &'a dyn WorkItemSource) -> Self {
        self.work_items = Some(source);
        self
    }

    /// Build the graph around `start`, which must already have passed the gate.
    pub fn build(&self, start: &Entity) -> Result<ImpactGraph> {
        let start_ref = start.asset_ref();
        let mut resolved: HashMap<String, Option<Entity>> = HashMap::new();
        resolved.insert(start_ref.node_id(), Some(start.clone()));

        let exploration = explore(&start_ref, |node, direction| {
            let candidates = match direction {
                Direction::Forward => self.relations.outgoing(node)?,
                Direction::Backward => self.relations.incoming(node)?,
            };

            let mut admitted = Vec::with_capacity(candidates.len());
            for relation in candidates {
                let far = match direction {
                    Direction::Forward => &relation.target,
                    Direction::Backward => &relation.source,
                };
                let exists = resolved
                    .entry(far.node_id())
                    .or_insert_with(|| self.gate.resolve(far))
                    .is_some();
                if exists {
                    admitted.push(relation);
                } else {
                    log::debug!("Skipping relation {}: {} did not pass the asset gate", relation.edge_id(), far);
                }
            }
            Ok(admitted)
        })?;

        let mut graph = ImpactGraph::default();
        for asset in &exploration.nodes {
            let node_id = asset.node_id();
            let label = resolved
                .get(&node_id)
                .and_then(|e| e.as_ref())
                .map(|e| node_label(asset, e))
                .unwrap_or_else(|| node_id.clone());
            let mut node = GraphNode::new(asset, label);
            node.open_items = self.open_items(asset);
            graph.nodes.entry(node_id).or_insert(node);
        }
        for (edge_id, (relation, flag)) in exploration.edges {
            graph.edges.insert(edge_id, GraphEdge::from_relation(&relation, flag));
        }

        log::debug!(
            "Built graph for {}: {} nodes, {} edges",
            start_ref,
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    fn open_items(&self, asset: &AssetRef) -> OpenWorkItems {
        let Some(source) = self.work_items else {
            return OpenWorkItems::default();
        };
        match source.open_items(asset) {
            Ok(items) => items,
            Err(e) => {
                log::warn!("Open work item lookup failed for {}: {}", asset, e);
                OpenWorkItems::default()
            }
        }
    }
}

fn node_label(asset: &AssetRef, entity: &Entity) -> String {
    if entity.name.trim().is_empty() {
        format!("{} ({})", asset.kind, asset.id)
    } else {
        entity.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{KindRegistry, WorkItem, WorkItemKind};
    use crate::graph::DirectionFlag;
    use crate::test_helpers::MemoryStore;
    use std::collections::BTreeSet;

    fn allowed() -> Vec<String> {
        vec!["Computer".to_string(), "NetworkEquipment".to_string()]
    }

    fn build(store: &MemoryStore, start: &AssetRef) -> ImpactGraph {
        let registry = KindRegistry::builtin();
        let allowed = allowed();
        let gate = AssetGate::new(&registry, &allowed, store);
        let start = gate.resolve(start).unwrap();
        GraphBuilder::new(store, &gate)
            .with_work_items(store)
            .build(&start)
            .unwrap()
    }

    #[test]
    fn test_scenario_chain_from_middle() {
        let store = MemoryStore::with_computers(&[1, 2, 3]);
        store.relate(("Computer", 1), ("Computer", 2));
        store.relate(("Computer", 2), ("Computer", 3));

        let graph = build(&store, &AssetRef::new("Computer", 2));
        let ids: BTreeSet<_> = graph.nodes.keys().cloned().collect();
        assert_eq!(
            ids,
            ["Computer::1", "Computer::2", "Computer::3"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges["Computer::1->Computer::2"].direction_flag, DirectionFlag::BACKWARD);
        assert_eq!(graph.edges["Computer::2->Computer::3"].direction_flag, DirectionFlag::FORWARD);
    }

    #[test]
    fn test_isolated_start_yields_single_node() {
        let store = MemoryStore::with_computers(&[7]);
        let graph = build(&store, &AssetRef::new("Computer", 7));
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.nodes["Computer::7"].label, "computer-7");
    }

    #[test]
    fn test_cycle_reports_both() {
        let store = MemoryStore::with_computers(&[1, 2, 3]);
        store.relate(("Computer", 1), ("Computer", 2));
        store.relate(("Computer", 2), ("Computer", 3));
        store.relate(("Computer", 3), ("Computer", 1));

        let graph = build(&store, &AssetRef::new("Computer", 1));
        assert_eq!(graph.nodes.len(), 3);
        for edge in graph.edges.values() {
            assert_eq!(edge.direction_flag, DirectionFlag::BOTH, "edge {}", edge.id);
        }
    }

    #[test]
    fn test_relations_to_disallowed_kinds_are_skipped() {
        let store = MemoryStore::with_computers(&[1]);
        store.add_entity("Printer", 5, "printer-5");
        store.relate(("Computer", 1), ("Printer", 5));
        store.relate(("Computer", 1), ("Computer", 99));

        let graph = build(&store, &AssetRef::new("Computer", 1));
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_open_items_populated_and_failure_tolerated() {
        let store = MemoryStore::with_computers(&[1, 2]);
        store.relate(("Computer", 1), ("Computer", 2));
        store.add_work_item(
            ("Computer", 2),
            WorkItemKind::Incident,
            WorkItem { id: 10, name: "Server down".to_string(), status: "New".to_string() },
        );

        let graph = build(&store, &AssetRef::new("Computer", 1));
        assert_eq!(graph.nodes["Computer::2"].open_items.incidents.len(), 1);
        assert!(graph.nodes["Computer::1"].open_items.is_empty());

        store.fail_work_items(true);
        let graph = build(&store, &AssetRef::new("Computer", 1));
        assert!(graph.nodes["Computer::2"].open_items.is_empty());
    }
}
