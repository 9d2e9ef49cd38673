use std::sync::Arc;
use std::time::Instant;

use super::link::{LinkEngine, TransmissionGraph};
use super::node::{Constellation, NetworkNode, NodeCapability, NodeId, NodeKind};
use super::path::{self, QueryResult};
use super::registry::NodeRegistry;
use super::store::NodeSet;
use super::NetworkError;
use crate::config::TransmissionConfig;
use crate::world::BlockAccess;
use crate::world::position::{ChunkPos, DimensionId};

/// Per-dimension network state: who exists, who is active, and the link
/// graph derived from the active set.
///
/// The graph is rebuilt lazily. Anything that can change links marks the
/// handler dirty; the next query pays for one full rebuild and every query
/// after that reuses it.
#[derive(Debug)]
pub struct NetworkHandler {
    dimension: DimensionId,
    registry: NodeRegistry,
    engine: LinkEngine,
    graph: TransmissionGraph,
    dirty: bool,
    rebuilds: u64,
}

impl NetworkHandler {
    pub fn new(store: NodeSet, config: Arc<TransmissionConfig>) -> Self {
        Self {
            dimension: store.dimension(),
            registry: NodeRegistry::from_store(store),
            engine: LinkEngine::new(config),
            graph: TransmissionGraph::new(),
            dirty: true,
            rebuilds: 0,
        }
    }

    pub fn dimension(&self) -> DimensionId {
        self.dimension
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &TransmissionConfig {
        self.engine.config()
    }

    /// Active nodes sorted by id.
    pub fn active_nodes(&self) -> Vec<&NetworkNode> {
        let mut nodes: Vec<&NetworkNode> = self.registry.active_nodes().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Number of full graph rebuilds so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn create(&mut self, node: NetworkNode) -> Result<(), NetworkError> {
        let id = node.id;
        if let Err(err) = self.registry.create(node) {
            tracing::warn!("Rejected node creation in {}: {}", self.dimension, err);
            return Err(err);
        }
        tracing::debug!("Created node {}", id);
        self.dirty = true;
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> Result<NetworkNode, NetworkError> {
        let node = self.registry.remove(id).inspect_err(|err| {
            tracing::warn!("Ignored removal in {}: {}", self.dimension, err);
        })?;
        tracing::debug!("Removed node {}", id);
        self.dirty = true;
        Ok(node)
    }

    pub fn activate(&mut self, id: NodeId) -> Result<bool, NetworkError> {
        let changed = self.registry.activate(id).inspect_err(|err| {
            tracing::debug!("Ignored activate in {}: {}", self.dimension, err);
        })?;
        self.dirty |= changed;
        Ok(changed)
    }

    pub fn deactivate(&mut self, id: NodeId) -> Result<bool, NetworkError> {
        let changed = self.registry.deactivate(id).inspect_err(|err| {
            tracing::debug!("Ignored deactivate in {}: {}", self.dimension, err);
        })?;
        self.dirty |= changed;
        Ok(changed)
    }

    pub fn activate_chunk(&mut self, chunk: ChunkPos) -> Vec<NodeId> {
        let changed = self.registry.activate_chunk(chunk);
        self.dirty |= !changed.is_empty();
        changed
    }

    pub fn deactivate_chunk(&mut self, chunk: ChunkPos) -> Vec<NodeId> {
        let changed = self.registry.deactivate_chunk(chunk);
        self.dirty |= !changed.is_empty();
        changed
    }

    /// The current link graph, rebuilt first if anything invalidated it.
    pub fn graph<B: BlockAccess + Sync + ?Sized>(&mut self, blocks: &B) -> &TransmissionGraph {
        if self.dirty {
            self.rebuild(blocks);
        }
        &self.graph
    }

    /// Best path from an active `source` to the nearest-by-loss active node
    /// of `target`, within `max_hops` links.
    pub fn query<B: BlockAccess + Sync + ?Sized>(
        &mut self,
        blocks: &B,
        source: NodeId,
        target: NodeKind,
        max_hops: usize,
    ) -> QueryResult {
        if !self.registry.is_active(&source) {
            tracing::debug!("Query from inactive or unknown node {}", source);
            return QueryResult::NoPathFound;
        }
        let graph = self.graph(blocks);
        path::best_path(graph, source, max_hops, |n| n.kind() == target, |_| true)
    }

    /// Starlight per tick arriving at `sink` from every active collector
    /// that can reach it, after path loss, capped at a consumer's demand.
    ///
    /// Each collector contributes along its own best path. Attuned prisms
    /// only pass light from collectors of the same constellation.
    pub fn deliverable<B: BlockAccess + Sync + ?Sized>(&mut self, blocks: &B, sink: NodeId) -> f64 {
        let Some(cap) = self.registry.get(&sink).filter(|_| self.registry.is_active(&sink)).map(|n| match n.capability {
            NodeCapability::Consumer { demand } => demand,
            _ => f64::INFINITY,
        }) else {
            return 0.0;
        };

        let max_hops = self.config().default_max_hops;
        let graph = self.graph(blocks);
        let mut total = 0.0;
        for node in graph.nodes() {
            let NodeCapability::Collector { rate, attunement } = node.capability else {
                continue;
            };
            if node.id == sink {
                continue;
            }
            let result = path::best_path(graph, node.id, max_hops, |n| n.id == sink, |n| passes(n, attunement));
            if let QueryResult::Found(found) = result {
                total += rate * (1.0 - found.loss).max(0.0);
            }
        }
        total.min(cap)
    }

    /// Give the node set back for check-in. Returns whether it changed.
    pub fn into_store(self) -> (NodeSet, bool) {
        self.registry.into_store()
    }

    fn rebuild<B: BlockAccess + Sync + ?Sized>(&mut self, blocks: &B) {
        let started = Instant::now();
        let nodes: Vec<&NetworkNode> = self.registry.active_nodes().collect();
        self.graph = self.engine.build(blocks, &nodes);
        self.dirty = false;
        self.rebuilds += 1;
        tracing::debug!(
            "Rebuilt {} graph: {} nodes, {} links in {:?}",
            self.dimension,
            self.graph.len(),
            self.graph.link_count(),
            started.elapsed()
        );
    }
}

fn passes(node: &NetworkNode, attunement: Constellation) -> bool {
    match node.capability {
        NodeCapability::Prism { attunement: Some(filter) } => filter == attunement,
        _ => true,
    }
}
