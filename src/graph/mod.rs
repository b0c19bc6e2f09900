//! Impact graph: stored relations, the bidirectional builder, validated
//! mutations and saved view contexts.

pub mod audit;
mod builder;
mod context;
mod mutation;
mod traversal;

pub use builder::GraphBuilder;
pub use context::{
    load_context, save_context, ImpactContext, NodePosition, DEFAULT_BACKWARD_COLOR,
    DEFAULT_BOTH_COLOR, DEFAULT_FORWARD_COLOR,
};
pub use mutation::{
    add_relation, apply_delta, apply_operation, delete_relation, log_summary, DeltaAction,
    DeltaOperation, MutationOutcome, OperationReport, RejectReason, STORE_FAILURE,
};
pub use traversal::{explore, Direction, Exploration};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

use crate::assets::{AssetRef, OpenWorkItems};
use crate::Result;

/// A stored directed link between two assets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub source: AssetRef,
    pub target: AssetRef,
}

impl Relation {
    pub fn new(source: AssetRef, target: AssetRef) -> Self {
        Self { source, target }
    }

    /// Edge id, always oriented as stored.
    pub fn edge_id(&self) -> String {
        edge_id(&self.source.node_id(), &self.target.node_id())
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

pub fn edge_id(from: &str, to: &str) -> String {
    format!("{}->{}", from, to)
}

/// Relation persistence. Uniqueness of the 4-tuple is enforced by the store.
pub trait RelationStore {
    /// Relations where `asset` is the source.
    fn outgoing(&self, asset: &AssetRef) -> Result<Vec<Relation>>;

    /// Relations where `asset` is the target.
    fn incoming(&self, asset: &AssetRef) -> Result<Vec<Relation>>;

    fn contains(&self, relation: &Relation) -> Result<bool>;

    /// Returns false when an identical relation already exists.
    fn insert(&self, relation: &Relation) -> Result<bool>;

    /// Returns false when no matching relation exists.
    fn remove(&self, relation: &Relation) -> Result<bool>;
}

/// 2-bit mask: bit 0 forward (impact), bit 1 backward (depends on).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectionFlag(u8);

impl DirectionFlag {
    pub const NONE: DirectionFlag = DirectionFlag(0);
    pub const FORWARD: DirectionFlag = DirectionFlag(1);
    pub const BACKWARD: DirectionFlag = DirectionFlag(2);
    pub const BOTH: DirectionFlag = DirectionFlag(3);

    pub fn from_bits(bits: u8) -> Self {
        DirectionFlag(bits & 0b11)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: DirectionFlag) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: DirectionFlag) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for DirectionFlag {
    type Output = DirectionFlag;

    fn bitor(self, rhs: DirectionFlag) -> DirectionFlag {
        DirectionFlag(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirectionFlag {
    fn bitor_assign(&mut self, rhs: DirectionFlag) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub open_items: OpenWorkItems,
}

impl GraphNode {
    pub fn new(asset: &AssetRef, label: impl Into<String>) -> Self {
        Self {
            id: asset.node_id(),
            label: label.into(),
            open_items: OpenWorkItems::default(),
        }
    }

    pub fn asset_ref(&self) -> Result<AssetRef> {
        AssetRef::from_node_id(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub direction_flag: DirectionFlag,
}

impl GraphEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, flag: DirectionFlag) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: edge_id(&from, &to),
            from,
            to,
            direction_flag: flag,
        }
    }

    pub fn from_relation(relation: &Relation, flag: DirectionFlag) -> Self {
        Self::new(relation.source.node_id(), relation.target.node_id(), flag)
    }

    pub fn relation(&self) -> Result<Relation> {
        Ok(Relation::new(
            AssetRef::from_node_id(&self.from)?,
            AssetRef::from_node_id(&self.to)?,
        ))
    }
}

/// Graph keyed by node id and edge id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpactGraph {
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: BTreeMap<String, GraphEdge>,
}

impl ImpactGraph {
    pub fn to_payload(&self) -> GraphPayload {
        GraphPayload {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    pub fn from_payload(payload: GraphPayload) -> Self {
        let mut graph = ImpactGraph::default();
        for node in payload.nodes {
            graph.nodes.entry(node.id.clone()).or_insert(node);
        }
        for edge in payload.edges {
            graph.edges.entry(edge.id.clone()).or_insert(edge);
        }
        graph
    }
}

/// Wire form of a graph: arrays, ordering not significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphPayload {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}
