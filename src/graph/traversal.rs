//! Two-direction depth-first exploration shared by the server-side builder
//! and the client session's flag recomputation.

use std::collections::{BTreeMap, HashSet};

use crate::assets::AssetRef;
use crate::graph::{DirectionFlag, Relation};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow relations where the current node is the source (impact).
    Forward,
    /// Follow relations where the current node is the target (depends on).
    Backward,
}

impl Direction {
    pub fn flag(&self) -> DirectionFlag {
        match self {
            Direction::Forward => DirectionFlag::FORWARD,
            Direction::Backward => DirectionFlag::BACKWARD,
        }
    }

    fn next<'r>(&self, relation: &'r Relation) -> &'r AssetRef {
        match self {
            Direction::Forward => &relation.target,
            Direction::Backward => &relation.source,
        }
    }
}

/// Result of exploring from a start node in both directions.
#[derive(Debug, Clone, Default)]
pub struct Exploration {
    /// Discovered nodes in first-discovery order; the start node is first.
    pub nodes: Vec<AssetRef>,
    /// Edge id -> (relation as stored, accumulated direction flag).
    pub edges: BTreeMap<String, (Relation, DirectionFlag)>,
}

impl Exploration {
    fn add_node(&mut self, seen: &mut HashSet<String>, asset: &AssetRef) {
        if seen.insert(asset.node_id()) {
            self.nodes.push(asset.clone());
        }
    }
}

/// Explore from `start` forward then backward. `neighbors` returns the
/// relations to follow from a node in the given direction.
///
/// Each direction keeps its own explored set, so a node is expanded at most
/// once per direction and cyclic relation sets terminate.
pub fn explore<F>(start: &AssetRef, mut neighbors: F) -> Result<Exploration>
where
    F: FnMut(&AssetRef, Direction) -> Result<Vec<Relation>>,
{
    let mut exploration = Exploration::default();
    let mut seen_nodes = HashSet::new();
    exploration.add_node(&mut seen_nodes, start);

    for direction in [Direction::Forward, Direction::Backward] {
        let mut explored: HashSet<String> = HashSet::new();
        let mut stack = vec![start.clone()];

        while let Some(current) = stack.pop() {
            if !explored.insert(current.node_id()) {
                continue;
            }

            for relation in neighbors(&current, direction)? {
                exploration.add_node(&mut seen_nodes, &relation.source);
                exploration.add_node(&mut seen_nodes, &relation.target);

                exploration
                    .edges
                    .entry(relation.edge_id())
                    .and_modify(|(_, flag)| *flag |= direction.flag())
                    .or_insert_with(|| (relation.clone(), direction.flag()));

                let next = direction.next(&relation);
                if !explored.contains(&next.node_id()) {
                    stack.push(next.clone());
                }
            }
        }
    }

    Ok(exploration)
}
