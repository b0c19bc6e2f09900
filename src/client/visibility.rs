//! Direction filter, edge colouring and depth limit for a graph session.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::graph::{
    DirectionFlag, GraphEdge, ImpactGraph, DEFAULT_BACKWARD_COLOR, DEFAULT_BOTH_COLOR,
    DEFAULT_FORWARD_COLOR,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeColors {
    pub forward: String,
    pub backward: String,
    pub both: String,
}

impl Default for EdgeColors {
    fn default() -> Self {
        Self {
            forward: DEFAULT_FORWARD_COLOR.to_string(),
            backward: DEFAULT_BACKWARD_COLOR.to_string(),
            both: DEFAULT_BOTH_COLOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visibility {
    pub show_forward: bool,
    pub show_backward: bool,
    pub colors: EdgeColors,
    /// Maximum distance from the start node, None for unlimited.
    pub max_depth: Option<u32>,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            show_forward: true,
            show_backward: true,
            colors: EdgeColors::default(),
            max_depth: None,
        }
    }
}

impl Visibility {
    pub fn effective_direction(&self) -> DirectionFlag {
        let mut flag = DirectionFlag::NONE;
        if self.show_forward {
            flag |= DirectionFlag::FORWARD;
        }
        if self.show_backward {
            flag |= DirectionFlag::BACKWARD;
        }
        flag
    }

    /// Colour for an edge flag; unreachable edges have none.
    pub fn edge_color(&self, flag: DirectionFlag) -> Option<&str> {
        match flag {
            DirectionFlag::FORWARD => Some(self.colors.forward.as_str()),
            DirectionFlag::BACKWARD => Some(self.colors.backward.as_str()),
            DirectionFlag::BOTH => Some(self.colors.both.as_str()),
            _ => None,
        }
    }

    fn edge_passes_direction(&self, edge: &GraphEdge) -> bool {
        let effective = self.effective_direction();
        effective == DirectionFlag::BOTH || edge.direction_flag.intersects(effective)
    }

    /// Node ids to hide. The start node is never hidden.
    pub fn hidden_nodes(&self, graph: &ImpactGraph, start: &str) -> BTreeSet<String> {
        let both = self.effective_direction() == DirectionFlag::BOTH;
        let mut hidden: BTreeSet<String> = graph
            .nodes
            .keys()
            .filter(|id| id.as_str() != start && !both)
            .filter(|id| {
                !graph
                    .edges
                    .values()
                    .any(|e| (&e.from == *id || &e.to == *id) && self.edge_passes_direction(e))
            })
            .cloned()
            .collect();

        if let Some(max_depth) = self.max_depth {
            let distances = self.distances(graph, start, &hidden);
            for id in graph.nodes.keys() {
                let too_far = distances.get(id).map_or(true, |d| *d > max_depth);
                if id != start && too_far {
                    hidden.insert(id.clone());
                }
            }
        }
        hidden
    }

    /// Edge ids to hide: edges filtered by direction or touching a hidden node.
    pub fn hidden_edges(&self, graph: &ImpactGraph, hidden_nodes: &BTreeSet<String>) -> BTreeSet<String> {
        graph
            .edges
            .values()
            .filter(|e| {
                !self.edge_passes_direction(e)
                    || hidden_nodes.contains(&e.from)
                    || hidden_nodes.contains(&e.to)
            })
            .map(|e| e.id.clone())
            .collect()
    }

    /// Undirected breadth-first distances over edges that pass the direction
    /// filter and join visible nodes.
    fn distances(&self, graph: &ImpactGraph, start: &str, hidden: &BTreeSet<String>) -> HashMap<String, u32> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in graph.edges.values() {
            if !self.edge_passes_direction(edge) || hidden.contains(&edge.from) || hidden.contains(&edge.to) {
                continue;
            }
            adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
            adjacency.entry(edge.to.as_str()).or_default().push(edge.from.as_str());
        }

        let mut distances = HashMap::new();
        let mut queue = VecDeque::new();
        distances.insert(start.to_string(), 0u32);
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            let depth = distances[current];
            for next in adjacency.get(current).into_iter().flatten() {
                if !distances.contains_key(*next) {
                    distances.insert(next.to_string(), depth + 1);
                    queue.push_back(*next);
                }
            }
        }
        distances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetRef;
    use crate::graph::GraphNode;

    fn graph(edges: &[(i64, i64, DirectionFlag)]) -> ImpactGraph {
        let mut graph = ImpactGraph::default();
        for (from, to, flag) in edges {
            for id in [from, to] {
                let asset = AssetRef::new("Computer", *id);
                graph.nodes.entry(asset.node_id()).or_insert_with(|| GraphNode::new(&asset, "n"));
            }
            let edge = GraphEdge::new(format!("Computer::{}", from), format!("Computer::{}", to), *flag);
            graph.edges.insert(edge.id.clone(), edge);
        }
        graph
    }

    // 1 -> 2 -> 3 from start 2, plus an orphan edge 4 -> 5
    fn sample() -> ImpactGraph {
        graph(&[
            (1, 2, DirectionFlag::BACKWARD),
            (2, 3, DirectionFlag::FORWARD),
            (4, 5, DirectionFlag::NONE),
        ])
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_both_directions_show_everything() {
        let visibility = Visibility::default();
        assert!(visibility.hidden_nodes(&sample(), "Computer::2").is_empty());
    }

    #[test]
    fn test_forward_only() {
        let visibility = Visibility { show_backward: false, ..Default::default() };
        let graph = sample();
        let hidden = visibility.hidden_nodes(&graph, "Computer::2");
        assert_eq!(hidden, ids(&["Computer::1", "Computer::4", "Computer::5"]));
        let hidden_edges = visibility.hidden_edges(&graph, &hidden);
        assert_eq!(hidden_edges, ids(&["Computer::1->Computer::2", "Computer::4->Computer::5"]));
    }

    #[test]
    fn test_nothing_shown_keeps_start() {
        let visibility = Visibility { show_forward: false, show_backward: false, ..Default::default() };
        let hidden = visibility.hidden_nodes(&sample(), "Computer::2");
        assert_eq!(hidden.len(), 4);
        assert!(!hidden.contains("Computer::2"));
    }

    #[test]
    fn test_max_depth_limits_distance() {
        let graph = graph(&[
            (1, 2, DirectionFlag::FORWARD),
            (2, 3, DirectionFlag::FORWARD),
            (3, 4, DirectionFlag::FORWARD),
        ]);
        let visibility = Visibility { max_depth: Some(1), ..Default::default() };
        assert_eq!(visibility.hidden_nodes(&graph, "Computer::1"), ids(&["Computer::3", "Computer::4"]));

        let visibility = Visibility { max_depth: Some(0), ..Default::default() };
        assert_eq!(visibility.hidden_nodes(&graph, "Computer::1").len(), 3);
    }

    #[test]
    fn test_edge_colors() {
        let visibility = Visibility::default();
        assert_eq!(visibility.edge_color(DirectionFlag::FORWARD), Some("#ff3418"));
        assert_eq!(visibility.edge_color(DirectionFlag::BOTH), Some("#ca29ff"));
        assert_eq!(visibility.edge_color(DirectionFlag::NONE), None);
    }
}
