//! Best-path search over a built [`TransmissionGraph`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use super::link::TransmissionGraph;
use super::node::{NetworkNode, NodeId};

/// An ordered node sequence with its accumulated cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    /// Source first, target last.
    pub nodes: Vec<NodeId>,
    /// Sum of link weights.
    pub loss: f64,
    /// Sum of link distances.
    pub length: f64,
}

impl Path {
    pub fn source(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn target(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    pub fn hops(&self) -> usize {
        self.nodes.len() - 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Found(Path),
    NoPathFound,
}

impl QueryResult {
    pub fn is_found(&self) -> bool {
        matches!(self, QueryResult::Found(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            QueryResult::Found(path) => Some(path),
            QueryResult::NoPathFound => None,
        }
    }

    pub fn into_path(self) -> Option<Path> {
        match self {
            QueryResult::Found(path) => Some(path),
            QueryResult::NoPathFound => None,
        }
    }
}

/// A partial path on the frontier. Ordered so the max-heap pops the lowest
/// loss first; ties fall to shorter length, then to the smaller node-id
/// sequence, which keeps results independent of hash iteration order.
struct Label {
    loss: f64,
    length: f64,
    nodes: Vec<NodeId>,
}

impl Label {
    fn head(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    fn hops(&self) -> usize {
        self.nodes.len() - 1
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .loss
            .total_cmp(&self.loss)
            .then_with(|| other.length.total_cmp(&self.length))
            .then_with(|| other.nodes.cmp(&self.nodes))
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Label {}

/// Lowest-loss simple path from `source` to the first node satisfying
/// `is_target`, using at most `max_hops` links.
///
/// `can_pass` decides whether a node may be used as an intermediate hop;
/// the source and the final target are never asked. Weights are
/// non-negative, so a node settled at some hop count cannot be improved
/// by a label that reaches it with as many hops or more; such labels are
/// pruned.
pub fn best_path(
    graph: &TransmissionGraph,
    source: NodeId,
    max_hops: usize,
    is_target: impl Fn(&NetworkNode) -> bool,
    can_pass: impl Fn(&NetworkNode) -> bool,
) -> QueryResult {
    if max_hops == 0 || graph.vertex(&source).is_none() {
        return QueryResult::NoPathFound;
    }

    let mut frontier = BinaryHeap::new();
    frontier.push(Label {
        loss: 0.0,
        length: 0.0,
        nodes: vec![source],
    });
    // Fewest hops each node has been settled with.
    let mut settled: HashMap<NodeId, usize> = HashMap::new();

    while let Some(label) = frontier.pop() {
        let head = label.head();
        let hops = label.hops();
        if settled.get(&head).is_some_and(|&h| h <= hops) {
            continue;
        }
        settled.insert(head, hops);

        let Some(vertex) = graph.vertex(&head) else {
            continue;
        };
        if hops > 0 {
            if is_target(&vertex.node) {
                return QueryResult::Found(Path {
                    nodes: label.nodes,
                    loss: label.loss,
                    length: label.length,
                });
            }
            if !can_pass(&vertex.node) {
                continue;
            }
        }
        if hops == max_hops {
            continue;
        }

        for link in &vertex.links {
            if label.nodes.contains(&link.target) {
                continue;
            }
            let mut nodes = Vec::with_capacity(label.nodes.len() + 1);
            nodes.extend_from_slice(&label.nodes);
            nodes.push(link.target);
            frontier.push(Label {
                loss: label.loss + link.weight,
                length: label.length + link.distance,
                nodes,
            });
        }
    }

    QueryResult::NoPathFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransmissionConfig;
    use crate::network::link::LinkEngine;
    use crate::network::node::{Constellation, NodeCapability, NodeKind};
    use crate::world::BlockAccess;
    use crate::world::position::{BlockPos, DimensionId};
    use std::sync::Arc;

    struct Open;

    impl BlockAccess for Open {
        fn is_opaque(&self, _pos: BlockPos) -> bool {
            false
        }

        fn node_kind_at(&self, _pos: BlockPos) -> Option<NodeKind> {
            None
        }
    }

    fn node(x: i64, z: i64, capability: NodeCapability) -> NetworkNode {
        NetworkNode::new(DimensionId::OVERWORLD, BlockPos::new(x, 0, z), capability)
    }

    fn build(nodes: &[NetworkNode]) -> TransmissionGraph {
        let refs: Vec<&NetworkNode> = nodes.iter().collect();
        LinkEngine::new(Arc::new(TransmissionConfig::default())).build(&Open, &refs)
    }

    fn any_kind(kind: NodeKind) -> impl Fn(&NetworkNode) -> bool {
        move |n| n.kind() == kind
    }

    #[test]
    fn colinear_relay_costs_the_same_as_direct() {
        let c = node(0, 0, NodeCapability::Collector { rate: 1.0, attunement: Constellation::Aevitas });
        let r = node(0, 7, NodeCapability::Relay);
        let k = node(0, 14, NodeCapability::Consumer { demand: 1.0 });
        let graph = build(&[c.clone(), r.clone(), k.clone()]);

        let path = best_path(&graph, c.id, 16, any_kind(NodeKind::Consumer), |_| true)
            .into_path()
            .unwrap();
        assert_eq!(path.target(), k.id);
        assert!((path.loss - 14.0 * 0.02).abs() < 1e-9);
    }

    #[test]
    fn hop_cap_is_respected() {
        let c = node(0, 0, NodeCapability::Collector { rate: 1.0, attunement: Constellation::Aevitas });
        let r1 = node(0, 12, NodeCapability::Relay);
        let r2 = node(0, 24, NodeCapability::Relay);
        let k = node(0, 36, NodeCapability::Consumer { demand: 1.0 });
        let graph = build(&[c.clone(), r1, r2, k.clone()]);

        assert!(!best_path(&graph, c.id, 2, any_kind(NodeKind::Consumer), |_| true).is_found());
        let path = best_path(&graph, c.id, 3, any_kind(NodeKind::Consumer), |_| true)
            .into_path()
            .unwrap();
        assert_eq!(path.hops(), 3);
        assert_eq!(path.source(), c.id);
    }

    #[test]
    fn zero_hops_and_unknown_source_find_nothing() {
        let c = node(0, 0, NodeCapability::Collector { rate: 1.0, attunement: Constellation::Aevitas });
        let k = node(0, 4, NodeCapability::Consumer { demand: 1.0 });
        let graph = build(&[c.clone(), k.clone()]);

        assert_eq!(best_path(&graph, c.id, 0, any_kind(NodeKind::Consumer), |_| true), QueryResult::NoPathFound);
        let ghost = node(50, 50, NodeCapability::Relay).id;
        assert_eq!(best_path(&graph, ghost, 8, any_kind(NodeKind::Consumer), |_| true), QueryResult::NoPathFound);
    }

    #[test]
    fn source_never_counts_as_its_own_target() {
        let r = node(0, 0, NodeCapability::Relay);
        let graph = build(&[r.clone()]);
        assert!(!best_path(&graph, r.id, 4, any_kind(NodeKind::Relay), |_| true).is_found());
    }

    #[test]
    fn blocked_intermediates_force_another_route() {
        let c = node(0, 0, NodeCapability::Collector { rate: 1.0, attunement: Constellation::Aevitas });
        let p = node(0, 12, NodeCapability::Prism { attunement: Some(Constellation::Vicio) });
        let r = node(6, 12, NodeCapability::Relay);
        let k = node(0, 24, NodeCapability::Consumer { demand: 1.0 });
        let graph = build(&[c.clone(), p.clone(), r.clone(), k.clone()]);

        let open = best_path(&graph, c.id, 4, any_kind(NodeKind::Consumer), |_| true)
            .into_path()
            .unwrap();
        assert_eq!(open.nodes, vec![c.id, p.id, k.id]);

        let filtered = best_path(&graph, c.id, 4, any_kind(NodeKind::Consumer), |n| n.kind() != NodeKind::Prism)
            .into_path()
            .unwrap();
        assert_eq!(filtered.nodes, vec![c.id, r.id, k.id]);
        assert!(filtered.loss > open.loss);
    }
}
