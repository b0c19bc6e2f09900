//! Interactive graph session.
//!
//! A [`GraphSession`] mirrors the nodes and edges of one impact graph, keeps
//! the pending [`Delta`] of relation changes, and owns the view settings
//! (direction filter, colours, depth limit, layout). Every edit is validated
//! first; a rejected edit returns an [`EditRejection`] and changes nothing.
//!
//! Adding a node needs the subgraph rooted at it. The fetch is split into
//! [`GraphSession::begin_add_node`] and [`GraphSession::complete_add_node`] so
//! an event loop can keep handling input while the request is in flight; any
//! conflicting edit in between is rejected as busy.

mod delta;
mod source;
mod visibility;

pub use delta::Delta;
pub use source::{HttpGraphSource, SubgraphSource};
pub use visibility::{EdgeColors, Visibility};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

use crate::assets::AssetRef;
use crate::graph::{
    explore, Direction, DeltaOperation, DirectionFlag, GraphEdge, GraphNode, GraphPayload,
    ImpactContext, ImpactGraph, NodePosition, Relation,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EditMode {
    #[default]
    Default,
    AddNode,
    AddEdge,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditRejection {
    #[error("duplicate asset")]
    DuplicateAsset,
    #[error("duplicate edge")]
    DuplicateEdge,
    #[error("link to self")]
    SelfLink,
    #[error("unknown node {0}")]
    UnknownNode(String),
    #[error("unknown edge {0}")]
    UnknownEdge(String),
    #[error("a subgraph is still loading")]
    Busy,
    #[error("the start node cannot be deleted")]
    StartNodeLocked,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type EditResult<T> = std::result::Result<T, EditRejection>;

/// Handle for an outstanding subgraph fetch, returned by
/// [`GraphSession::begin_add_node`].
#[derive(Debug, PartialEq, Eq)]
pub struct PendingFetch {
    asset: AssetRef,
}

impl PendingFetch {
    pub fn asset(&self) -> &AssetRef {
        &self.asset
    }
}

pub struct GraphSession {
    start: AssetRef,
    graph: ImpactGraph,
    delta: Delta,
    mode: EditMode,
    visibility: Visibility,
    positions: BTreeMap<String, NodePosition>,
    zoom: f64,
    pan: (f64, f64),
    pending: Option<String>,
}

impl GraphSession {
    /// Open a session on the graph the server built for `start`.
    pub fn new(start: AssetRef, payload: GraphPayload) -> Self {
        let mut session = Self {
            start,
            graph: ImpactGraph::default(),
            delta: Delta::new(),
            mode: EditMode::Default,
            visibility: Visibility::default(),
            positions: BTreeMap::new(),
            zoom: 1.0,
            pan: (0.0, 0.0),
            pending: None,
        };
        session.merge(payload);
        let start = session.start.clone();
        session.ensure_node(&start);
        session.recompute_flags();
        session
    }

    pub fn start(&self) -> &AssetRef {
        &self.start
    }

    pub fn start_node_id(&self) -> String {
        self.start.node_id()
    }

    pub fn graph(&self) -> &ImpactGraph {
        &self.graph
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.graph.nodes.get(node_id)
    }

    pub fn edge(&self, edge_id: &str) -> Option<&GraphEdge> {
        self.graph.edges.get(edge_id)
    }

    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    /// Switch to `mode`, or back to [`EditMode::Default`] when it is already active.
    pub fn toggle_mode(&mut self, mode: EditMode) -> EditMode {
        self.mode = if self.mode == mode { EditMode::Default } else { mode };
        log::debug!("Graph session mode is now {:?}", self.mode);
        self.mode
    }

    pub fn dragging_enabled(&self) -> bool {
        self.mode != EditMode::AddEdge
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    fn ensure_idle(&self) -> EditResult<()> {
        if self.is_busy() {
            return Err(EditRejection::Busy);
        }
        Ok(())
    }

    /// Recompute every edge flag from scratch with a two-direction traversal
    /// of the local edges. Edges not reached from the start node get 0.
    pub fn recompute_flags(&mut self) {
        let mut outgoing: HashMap<String, Vec<Relation>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<Relation>> = HashMap::new();
        for edge in self.graph.edges.values() {
            match edge.relation() {
                Ok(relation) => {
                    outgoing.entry(edge.from.clone()).or_default().push(relation.clone());
                    incoming.entry(edge.to.clone()).or_default().push(relation);
                }
                Err(e) => log::warn!("Ignoring edge {} during flag computation: {}", edge.id, e),
            }
        }

        let exploration = explore(&self.start, |node, direction| {
            let index = match direction {
                Direction::Forward => &outgoing,
                Direction::Backward => &incoming,
            };
            Ok(index.get(&node.node_id()).cloned().unwrap_or_default())
        });
        let exploration = match exploration {
            Ok(exploration) => exploration,
            Err(e) => {
                log::warn!("Flag computation failed: {}", e);
                return;
            }
        };

        for edge in self.graph.edges.values_mut() {
            edge.direction_flag = exploration
                .edges
                .get(&edge.id)
                .map(|(_, flag)| *flag)
                .unwrap_or(DirectionFlag::NONE);
        }
    }

    /// Merge a fetched payload. Entries already present win; malformed
    /// entries are dropped.
    fn merge(&mut self, payload: GraphPayload) {
        for node in payload.nodes {
            if let Err(e) = AssetRef::from_node_id(&node.id) {
                log::warn!("Dropping node with malformed id {:?}: {}", node.id, e);
                continue;
            }
            self.graph.nodes.entry(node.id.clone()).or_insert(node);
        }
        for edge in payload.edges {
            if let Err(e) = edge.relation() {
                log::warn!("Dropping edge {:?}: {}", edge.id, e);
                continue;
            }
            if !self.graph.nodes.contains_key(&edge.from) || !self.graph.nodes.contains_key(&edge.to) {
                log::warn!("Dropping edge {} with an endpoint outside the graph", edge.id);
                continue;
            }
            let edge = GraphEdge::new(edge.from, edge.to, edge.direction_flag);
            self.graph.edges.entry(edge.id.clone()).or_insert(edge);
        }
    }

    fn ensure_node(&mut self, asset: &AssetRef) {
        let node_id = asset.node_id();
        if !self.graph.nodes.contains_key(&node_id) {
            self.graph.nodes.insert(node_id.clone(), GraphNode::new(asset, node_id));
        }
    }

    /// First half of adding a node: validate and mark the fetch as outstanding.
    pub fn begin_add_node(&mut self, asset: AssetRef) -> EditResult<PendingFetch> {
        self.ensure_idle()?;
        let node_id = asset.node_id();
        if self.graph.nodes.contains_key(&node_id) {
            return Err(EditRejection::DuplicateAsset);
        }
        self.pending = Some(node_id);
        Ok(PendingFetch { asset })
    }

    /// Second half of adding a node. A failed fetch leaves the graph as it was.
    pub fn complete_add_node(
        &mut self,
        pending: PendingFetch,
        fetched: crate::Result<GraphPayload>,
    ) -> EditResult<()> {
        if self.pending.as_deref() != Some(pending.asset.node_id().as_str()) {
            return Err(EditRejection::Unexpected(format!(
                "no fetch outstanding for {}",
                pending.asset
            )));
        }
        self.pending = None;

        let payload = match fetched {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Subgraph fetch for {} failed: {}", pending.asset, e);
                return Err(EditRejection::Unexpected(e.to_string()));
            }
        };
        self.merge(payload);
        self.ensure_node(&pending.asset);
        self.recompute_flags();
        log::debug!("Added {} with its subgraph", pending.asset);
        Ok(())
    }

    /// Add a node and its subgraph from `source`.
    pub async fn add_node(&mut self, asset: AssetRef, source: &dyn SubgraphSource) -> EditResult<()> {
        let pending = self.begin_add_node(asset)?;
        let fetched = source.fetch_subgraph(pending.asset()).await;
        self.complete_add_node(pending, fetched)
    }

    fn check_new_edge(&self, from: &str, to: &str) -> EditResult<Relation> {
        if from == to {
            return Err(EditRejection::SelfLink);
        }
        for endpoint in [from, to] {
            if !self.graph.nodes.contains_key(endpoint) {
                return Err(EditRejection::UnknownNode(endpoint.to_string()));
            }
        }
        let edge = GraphEdge::new(from, to, DirectionFlag::NONE);
        if self.graph.edges.contains_key(&edge.id) {
            return Err(EditRejection::DuplicateEdge);
        }
        edge.relation().map_err(|e| EditRejection::Unexpected(e.to_string()))
    }

    pub fn add_edge(&mut self, from: &str, to: &str) -> EditResult<()> {
        self.ensure_idle()?;
        let relation = self.check_new_edge(from, to)?;
        let edge = GraphEdge::from_relation(&relation, DirectionFlag::NONE);
        self.graph.edges.insert(edge.id.clone(), edge);
        self.delta.record_add(&relation);
        self.recompute_flags();
        Ok(())
    }

    /// Re-point an edge: delete the old one and add one between `from` and `to`.
    pub fn edit_edge(&mut self, edge_id: &str, from: &str, to: &str) -> EditResult<()> {
        self.ensure_idle()?;
        let old = self
            .graph
            .edges
            .get(edge_id)
            .ok_or_else(|| EditRejection::UnknownEdge(edge_id.to_string()))?;
        if old.from == from && old.to == to {
            return Ok(());
        }
        let old_relation = old.relation().map_err(|e| EditRejection::Unexpected(e.to_string()))?;
        let new_relation = self.check_new_edge(from, to)?;

        self.graph.edges.remove(edge_id);
        self.delta.record_delete(&old_relation);
        let edge = GraphEdge::from_relation(&new_relation, DirectionFlag::NONE);
        self.graph.edges.insert(edge.id.clone(), edge);
        self.delta.record_add(&new_relation);
        self.recompute_flags();
        Ok(())
    }

    /// Delete nodes and edges. Edges adjacent to a deleted node go with it.
    /// Nothing is removed if any id is unknown or the start node is listed.
    pub fn delete_elements(&mut self, node_ids: &[String], edge_ids: &[String]) -> EditResult<()> {
        self.ensure_idle()?;
        let start = self.start_node_id();
        for node_id in node_ids {
            if *node_id == start {
                return Err(EditRejection::StartNodeLocked);
            }
            if !self.graph.nodes.contains_key(node_id) {
                return Err(EditRejection::UnknownNode(node_id.clone()));
            }
        }
        for edge_id in edge_ids {
            if !self.graph.edges.contains_key(edge_id) {
                return Err(EditRejection::UnknownEdge(edge_id.clone()));
            }
        }

        let doomed_nodes: BTreeSet<&String> = node_ids.iter().collect();
        let doomed_edges: BTreeSet<String> = self
            .graph
            .edges
            .values()
            .filter(|e| {
                edge_ids.contains(&e.id) || doomed_nodes.contains(&e.from) || doomed_nodes.contains(&e.to)
            })
            .map(|e| e.id.clone())
            .collect();

        for edge_id in &doomed_edges {
            if let Some(edge) = self.graph.edges.remove(edge_id) {
                match edge.relation() {
                    Ok(relation) => self.delta.record_delete(&relation),
                    Err(e) => log::warn!("Deleted edge {} has no relation: {}", edge.id, e),
                }
            }
        }
        for node_id in node_ids {
            self.graph.nodes.remove(node_id);
            self.positions.remove(node_id);
        }
        self.recompute_flags();
        Ok(())
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn set_show_forward(&mut self, show: bool) {
        self.visibility.show_forward = show;
    }

    pub fn set_show_backward(&mut self, show: bool) {
        self.visibility.show_backward = show;
    }

    pub fn set_colors(&mut self, colors: EdgeColors) {
        self.visibility.colors = colors;
    }

    pub fn set_max_depth(&mut self, max_depth: Option<u32>) {
        self.visibility.max_depth = max_depth;
    }

    pub fn hidden_nodes(&self) -> BTreeSet<String> {
        self.visibility.hidden_nodes(&self.graph, &self.start_node_id())
    }

    pub fn hidden_edges(&self) -> BTreeSet<String> {
        self.visibility.hidden_edges(&self.graph, &self.hidden_nodes())
    }

    pub fn edge_color(&self, edge_id: &str) -> Option<&str> {
        self.graph
            .edges
            .get(edge_id)
            .and_then(|e| self.visibility.edge_color(e.direction_flag))
    }

    pub fn set_position(&mut self, node_id: &str, position: NodePosition) -> EditResult<()> {
        if !self.graph.nodes.contains_key(node_id) {
            return Err(EditRejection::UnknownNode(node_id.to_string()));
        }
        self.positions.insert(node_id.to_string(), position);
        Ok(())
    }

    pub fn position(&self, node_id: &str) -> Option<NodePosition> {
        self.positions.get(node_id).copied()
    }

    /// The delta as an ordered list of operations for the mutation endpoint.
    pub fn submission(&self) -> Vec<DeltaOperation> {
        self.delta.operations()
    }

    /// Forget the delta once the server accepted it.
    pub fn mark_submitted(&mut self) {
        self.delta.clear();
    }

    /// Take view settings from a saved context. Positions of nodes that are
    /// not in the graph are ignored.
    pub fn apply_context(&mut self, context: &ImpactContext) {
        self.visibility = Visibility {
            show_forward: context.show_forward,
            show_backward: context.show_backward,
            colors: EdgeColors {
                forward: context.forward_color.clone(),
                backward: context.backward_color.clone(),
                both: context.both_color.clone(),
            },
            max_depth: context.max_depth,
        };
        self.zoom = context.zoom;
        self.pan = (context.pan_x, context.pan_y);
        self.positions = context
            .positions
            .iter()
            .filter(|(id, _)| self.graph.nodes.contains_key(*id))
            .map(|(id, p)| (id.clone(), *p))
            .collect();
    }

    pub fn to_context(&self) -> ImpactContext {
        let mut context = ImpactContext::defaults_for(&self.start);
        context.positions = self.positions.clone();
        context.zoom = self.zoom;
        context.pan_x = self.pan.0;
        context.pan_y = self.pan.1;
        context.show_forward = self.visibility.show_forward;
        context.show_backward = self.visibility.show_backward;
        context.forward_color = self.visibility.colors.forward.clone();
        context.backward_color = self.visibility.colors.backward.clone();
        context.both_color = self.visibility.colors.both.clone();
        context.max_depth = self.visibility.max_depth;
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DeltaAction;
    use crate::{ImpactError, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn pc(id: i64) -> AssetRef {
        AssetRef::new("Computer", id)
    }

    fn nid(id: i64) -> String {
        pc(id).node_id()
    }

    fn payload(nodes: &[i64], edges: &[(i64, i64)]) -> GraphPayload {
        GraphPayload {
            nodes: nodes.iter().map(|id| GraphNode::new(&pc(*id), format!("pc-{}", id))).collect(),
            edges: edges
                .iter()
                .map(|(a, b)| GraphEdge::new(nid(*a), nid(*b), DirectionFlag::NONE))
                .collect(),
        }
    }

    fn flag(session: &GraphSession, from: i64, to: i64) -> DirectionFlag {
        session.edge(&crate::graph::edge_id(&nid(from), &nid(to))).unwrap().direction_flag
    }

    struct FixedSource(HashMap<String, GraphPayload>);

    #[async_trait]
    impl SubgraphSource for FixedSource {
        async fn fetch_subgraph(&self, asset: &AssetRef) -> Result<GraphPayload> {
            self.0
                .get(&asset.node_id())
                .cloned()
                .ok_or_else(|| ImpactError::Unexpected("connection reset".to_string()))
        }
    }

    #[test]
    fn test_new_session_recomputes_flags() {
        // {1->2, 2->3} from 2: 1->2 backward, 2->3 forward
        let session = GraphSession::new(pc(2), payload(&[1, 2, 3], &[(1, 2), (2, 3)]));
        assert_eq!(flag(&session, 1, 2), DirectionFlag::BACKWARD);
        assert_eq!(flag(&session, 2, 3), DirectionFlag::FORWARD);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2, 3], &[(1, 2), (2, 3), (3, 1)]));
        let before = session.graph().clone();
        session.recompute_flags();
        session.recompute_flags();
        assert_eq!(session.graph(), &before);
        assert_eq!(flag(&session, 3, 1), DirectionFlag::BOTH);
    }

    #[test]
    fn test_mode_toggling() {
        let mut session = GraphSession::new(pc(1), GraphPayload::default());
        assert_eq!(session.toggle_mode(EditMode::AddEdge), EditMode::AddEdge);
        assert!(!session.dragging_enabled());
        assert_eq!(session.toggle_mode(EditMode::AddNode), EditMode::AddNode);
        assert!(session.dragging_enabled());
        assert_eq!(session.toggle_mode(EditMode::AddNode), EditMode::Default);
    }

    #[test]
    fn test_add_edge_checks_and_records() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2], &[]));
        assert_eq!(session.add_edge(&nid(1), &nid(1)), Err(EditRejection::SelfLink));
        assert_eq!(session.add_edge(&nid(1), &nid(9)), Err(EditRejection::UnknownNode(nid(9))));

        session.add_edge(&nid(1), &nid(2)).unwrap();
        assert_eq!(flag(&session, 1, 2), DirectionFlag::FORWARD);
        assert_eq!(session.add_edge(&nid(1), &nid(2)), Err(EditRejection::DuplicateEdge));

        // Reverse orientation is a different edge
        session.add_edge(&nid(2), &nid(1)).unwrap();
        assert_eq!(flag(&session, 1, 2), DirectionFlag::BOTH);
        assert_eq!(session.delta().len(), 2);
    }

    #[test]
    fn test_add_then_delete_leaves_empty_delta() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2], &[]));
        session.add_edge(&nid(1), &nid(2)).unwrap();
        session.delete_elements(&[], &[format!("{}->{}", nid(1), nid(2))]).unwrap();
        assert!(session.delta().is_empty());
        assert!(session.graph().edges.is_empty());
    }

    #[test]
    fn test_delete_node_removes_adjacent_edges() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2, 3], &[(1, 2), (2, 3)]));
        session.delete_elements(&[nid(2)], &[]).unwrap();

        assert!(session.node(&nid(2)).is_none());
        assert!(session.graph().edges.is_empty());
        let ops = session.submission();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.parsed_action() == Some(DeltaAction::Delete)));
        // Node 3 stays, now unreachable
        assert!(session.node(&nid(3)).is_some());
    }

    #[test]
    fn test_start_node_cannot_be_deleted() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2], &[(1, 2)]));
        assert_eq!(
            session.delete_elements(&[nid(2), nid(1)], &[]),
            Err(EditRejection::StartNodeLocked)
        );
        assert_eq!(session.graph().nodes.len(), 2);
        assert!(session.delta().is_empty());
    }

    #[test]
    fn test_unreachable_edges_get_zero_flag() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2, 3, 4], &[(1, 2), (3, 4)]));
        assert_eq!(flag(&session, 3, 4), DirectionFlag::NONE);
        session.add_edge(&nid(2), &nid(3)).unwrap();
        assert_eq!(flag(&session, 3, 4), DirectionFlag::FORWARD);
    }

    #[test]
    fn test_edit_edge() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2, 3], &[(1, 2), (1, 3)]));
        let edge_id = format!("{}->{}", nid(1), nid(2));

        // New endpoints collide with 1->3: nothing changes
        assert_eq!(session.edit_edge(&edge_id, &nid(1), &nid(3)), Err(EditRejection::DuplicateEdge));
        assert_eq!(session.edit_edge(&edge_id, &nid(2), &nid(2)), Err(EditRejection::SelfLink));
        assert!(session.edge(&edge_id).is_some());
        assert!(session.delta().is_empty());

        session.edit_edge(&edge_id, &nid(2), &nid(3)).unwrap();
        assert!(session.edge(&edge_id).is_none());
        assert_eq!(flag(&session, 2, 3), DirectionFlag::NONE);
        let ops = session.submission();
        assert_eq!(ops[0].parsed_action(), Some(DeltaAction::Delete));
        assert_eq!(ops[1].parsed_action(), Some(DeltaAction::Add));
        assert_eq!(ops[1].source_id, Some(2));
    }

    #[tokio::test]
    async fn test_add_node_merges_existing_entries_win() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2], &[(1, 2)]));
        let mut fetched = payload(&[5, 2], &[(5, 2)]);
        fetched.nodes[1].label = "renamed".to_string();
        let source = FixedSource(HashMap::from([(nid(5), fetched)]));

        session.add_node(pc(5), &source).await.unwrap();
        assert_eq!(session.node(&nid(2)).unwrap().label, "pc-2");
        assert_eq!(session.node(&nid(5)).unwrap().label, "pc-5");
        // 5->2 is not reachable from 1 in either direction
        assert_eq!(flag(&session, 5, 2), DirectionFlag::NONE);
        assert!(session.delta().is_empty());

        assert_eq!(session.add_node(pc(2), &source).await, Err(EditRejection::DuplicateAsset));
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_state_intact() {
        let mut session = GraphSession::new(pc(1), payload(&[1], &[]));
        let source = FixedSource(HashMap::new());
        let before = session.graph().clone();

        let result = session.add_node(pc(7), &source).await;
        assert!(matches!(result, Err(EditRejection::Unexpected(_))));
        assert_eq!(session.graph(), &before);
        assert!(!session.is_busy());
    }

    #[test]
    fn test_edits_rejected_while_fetch_outstanding() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2], &[]));
        let pending = session.begin_add_node(pc(3)).unwrap();
        assert!(session.is_busy());
        assert_eq!(session.add_edge(&nid(1), &nid(2)), Err(EditRejection::Busy));
        assert_eq!(session.begin_add_node(pc(4)), Err(EditRejection::Busy));

        session.complete_add_node(pending, Ok(payload(&[3], &[]))).unwrap();
        assert!(session.node(&nid(3)).is_some());
        session.add_edge(&nid(1), &nid(2)).unwrap();
    }

    #[test]
    fn test_context_round_trip() {
        let mut session = GraphSession::new(pc(1), payload(&[1, 2], &[(1, 2)]));
        let mut context = ImpactContext::defaults_for(&pc(1));
        context.show_backward = false;
        context.max_depth = Some(3);
        context.forward_color = "#00ff00".to_string();
        context.positions.insert(nid(2), NodePosition { x: 1.0, y: 2.0 });
        context.positions.insert(nid(8), NodePosition { x: 0.0, y: 0.0 });

        session.apply_context(&context);
        assert_eq!(session.edge_color(&format!("{}->{}", nid(1), nid(2))), Some("#00ff00"));
        assert!(session.position(&nid(8)).is_none());

        context.positions.remove(&nid(8));
        assert_eq!(session.to_context(), context);
    }

    #[test]
    fn test_visibility_through_session() {
        let mut session = GraphSession::new(pc(2), payload(&[1, 2, 3], &[(1, 2), (2, 3)]));
        session.set_show_forward(false);
        assert_eq!(session.hidden_nodes(), BTreeSet::from([nid(3)]));
        assert_eq!(session.hidden_edges(), BTreeSet::from([format!("{}->{}", nid(2), nid(3))]));
        session.set_show_forward(true);
        session.set_max_depth(Some(0));
        assert_eq!(session.hidden_nodes().len(), 2);
    }
}
