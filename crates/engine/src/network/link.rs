//! Link computation: which active nodes can see each other, and at what loss.
//!
//! The graph is always rebuilt from scratch. There is no incremental edge
//! maintenance; a rebuild is `O(active²)` pair checks plus one voxel walk
//! per candidate pair, and active node counts stay small because they are
//! chunk-gated.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use slotmap::{SlotMap, new_key_type};

use super::node::{NetworkNode, NodeId};
use crate::config::TransmissionConfig;
use crate::world::BlockAccess;
use crate::world::position::BlockPos;

new_key_type! {
    /// Handle for a vertex in one build of the transmission graph.
    pub struct VertexKey;
}

/// A directed, derived edge. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionLink {
    pub source: NodeId,
    pub target: NodeId,
    /// Loss factor; lower is better.
    pub weight: f64,
    /// Euclidean length between block centers.
    pub distance: f64,
    pub obstructions: u32,
}

/// Something odd the build noticed and stepped around.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Several nodes claim the same block; no links are built between them.
    SharedPosition { pos: BlockPos, nodes: Vec<NodeId> },
}

#[derive(Debug)]
pub struct Vertex {
    /// Snapshot of the node at build time.
    pub node: NetworkNode,
    /// Outgoing links, ordered by target id.
    pub links: Vec<TransmissionLink>,
}

/// One full build of a dimension's link graph.
#[derive(Debug, Default)]
pub struct TransmissionGraph {
    vertices: SlotMap<VertexKey, Vertex>,
    index: HashMap<NodeId, VertexKey>,
    diagnostics: Vec<Diagnostic>,
}

impl TransmissionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex(&self, id: &NodeId) -> Option<&Vertex> {
        self.index.get(id).and_then(|key| self.vertices.get(*key))
    }

    pub fn node(&self, id: &NodeId) -> Option<&NetworkNode> {
        self.vertex(id).map(|v| &v.node)
    }

    pub fn links_from(&self, id: &NodeId) -> &[TransmissionLink] {
        self.vertex(id).map(|v| v.links.as_slice()).unwrap_or(&[])
    }

    pub fn link(&self, source: &NodeId, target: &NodeId) -> Option<&TransmissionLink> {
        self.links_from(source).iter().find(|l| l.target == *target)
    }

    /// Vertex nodes in id order.
    pub fn nodes(&self) -> Vec<&NetworkNode> {
        let mut nodes: Vec<&NetworkNode> = self.vertices.values().map(|v| &v.node).collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn link_count(&self) -> usize {
        self.vertices.values().map(|v| v.links.len()).sum()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Export the graph in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let mut out = String::from(
            "digraph starlight {\n  node [shape=box, fontname=\"monospace\", fontsize=10];\n",
        );
        for node in self.nodes() {
            let color = match node.kind() {
                super::NodeKind::Collector => "#fff3cd",
                super::NodeKind::Consumer => "#d4edda",
                super::NodeKind::Gateway => "#e2d9f3",
                _ => "#f8f9fa",
            };
            let p = node.position;
            out.push_str(&format!(
                "  \"{}\" [label=\"{} ({},{},{})\", style=filled, fillcolor=\"{color}\"];\n",
                node.id,
                node.kind().name(),
                p.x,
                p.y,
                p.z
            ));
        }
        for node in self.nodes() {
            for link in self.links_from(&node.id) {
                out.push_str(&format!(
                    "  \"{}\" -> \"{}\" [label=\"{:.3}\"];\n",
                    link.source, link.target, link.weight
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Count opaque blocks strictly between two block centers.
///
/// Walks the voxels the segment passes through (3D DDA). When the segment
/// crosses an edge or corner exactly, every tied axis steps at once, so
/// a perfectly diagonal beam is not blocked by the blocks beside it.
pub fn count_obstructions<B: BlockAccess + ?Sized>(blocks: &B, from: BlockPos, to: BlockPos) -> u32 {
    const EPS: f64 = 1e-9;

    let delta = [to.x - from.x, to.y - from.y, to.z - from.z];
    let step = delta.map(i64::signum);
    let t_delta = delta.map(|d| if d == 0 { f64::INFINITY } else { 1.0 / d.abs() as f64 });
    // Both ends sit at block centers, so the first boundary on each axis is
    // half a block away.
    let mut t_max = t_delta.map(|t| t * 0.5);

    let mut voxel = [from.x, from.y, from.z];
    let target = [to.x, to.y, to.z];
    let budget = delta.iter().map(|d| d.unsigned_abs()).sum::<u64>();

    let mut count = 0;
    for _ in 0..budget {
        let t = t_max[0].min(t_max[1]).min(t_max[2]);
        for axis in 0..3 {
            if (t_max[axis] - t).abs() < EPS {
                voxel[axis] += step[axis];
                t_max[axis] += t_delta[axis];
            }
        }
        if voxel == target {
            break;
        }
        if blocks.is_opaque(BlockPos::new(voxel[0], voxel[1], voxel[2])) {
            count += 1;
        }
    }
    count
}

/// Builds [`TransmissionGraph`]s under one configuration.
#[derive(Debug, Clone)]
pub struct LinkEngine {
    config: Arc<TransmissionConfig>,
}

impl LinkEngine {
    pub fn new(config: Arc<TransmissionConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransmissionConfig {
        &self.config
    }

    /// Edge weight for a beam of `distance` blocks through `obstructions`
    /// opaque blocks.
    pub fn weight(&self, distance: f64, obstructions: u32) -> f64 {
        self.config.base_loss_per_block * distance
            + self.config.obstruction_penalty * obstructions as f64
    }

    /// The link from `a` to `b`, if one exists.
    pub fn evaluate<B: BlockAccess + ?Sized>(
        &self,
        blocks: &B,
        a: &NetworkNode,
        b: &NetworkNode,
    ) -> Option<TransmissionLink> {
        if a.id == b.id || a.dimension() != b.dimension() || !a.kind().can_link_to(b.kind()) {
            return None;
        }
        let pa = self.config.profile(a.kind());
        let pb = self.config.profile(b.kind());

        let distance = a.position.distance(&b.position);
        if distance > pa.max_range.min(pb.max_range) {
            return None;
        }

        let obstructions = count_obstructions(blocks, a.position, b.position);
        if obstructions > pa.obstruction_tolerance.min(pb.obstruction_tolerance) {
            return None;
        }

        Some(TransmissionLink {
            source: a.id,
            target: b.id,
            weight: self.weight(distance, obstructions),
            distance,
            obstructions,
        })
    }

    /// Full rebuild over `nodes`. Runs candidate evaluation on the rayon pool
    /// when `parallel_rebuild` is set; the result is identical either way.
    pub fn build<B: BlockAccess + Sync + ?Sized>(
        &self,
        blocks: &B,
        nodes: &[&NetworkNode],
    ) -> TransmissionGraph {
        let mut sorted: Vec<&NetworkNode> = nodes.to_vec();
        sorted.sort_by_key(|n| n.id);
        sorted.dedup_by_key(|n| n.id);

        let diagnostics = shared_positions(&sorted);

        let outgoing: Vec<Vec<TransmissionLink>> = if self.config.parallel_rebuild {
            sorted
                .par_iter()
                .map(|a| self.links_from(blocks, a, &sorted))
                .collect()
        } else {
            sorted
                .iter()
                .map(|a| self.links_from(blocks, a, &sorted))
                .collect()
        };

        let mut graph = TransmissionGraph {
            vertices: SlotMap::with_capacity_and_key(sorted.len()),
            index: HashMap::with_capacity(sorted.len()),
            diagnostics,
        };
        for (node, links) in sorted.into_iter().zip(outgoing) {
            let key = graph.vertices.insert(Vertex {
                node: node.clone(),
                links,
            });
            graph.index.insert(node.id, key);
        }
        graph
    }

    fn links_from<B: BlockAccess + ?Sized>(
        &self,
        blocks: &B,
        a: &NetworkNode,
        all: &[&NetworkNode],
    ) -> Vec<TransmissionLink> {
        all.iter()
            // Pairs sharing a block were reported by `shared_positions`.
            .filter(|b| b.position != a.position)
            .filter_map(|b| self.evaluate(blocks, a, b))
            .collect()
    }
}

fn shared_positions(sorted: &[&NetworkNode]) -> Vec<Diagnostic> {
    let mut by_pos: HashMap<BlockPos, Vec<NodeId>> = HashMap::new();
    for node in sorted {
        by_pos.entry(node.position).or_default().push(node.id);
    }
    let mut out: Vec<Diagnostic> = by_pos
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(pos, nodes)| {
            tracing::warn!(
                "{} nodes share block ({},{},{}); skipping links between them",
                nodes.len(),
                pos.x,
                pos.y,
                pos.z
            );
            Diagnostic::SharedPosition { pos, nodes }
        })
        .collect();
    out.sort_by_key(|d| match d {
        Diagnostic::SharedPosition { pos, .. } => *pos,
    });
    out
}
