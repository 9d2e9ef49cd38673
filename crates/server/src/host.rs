//! The host integration layer: owns block storage per dimension, streams
//! chunks, and drives the starlight network's lifecycle hooks.
//!
//! Every public operation publishes the network changes it caused on the
//! event bus before returning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use starlight_engine::TransmissionConfig;
use starlight_engine::cache::CacheBackend;
use starlight_engine::network::{
    ChunkLifecycle, GatewayEntry, IntegrityReport, NetworkContext, NetworkError, NetworkNode, NodeCapability,
    NodeId, NodeKind, QueryResult,
};
use starlight_engine::world::World;
use starlight_engine::world::chunk::Chunk;
use starlight_engine::world::block::BlockId;
use starlight_engine::world::position::{BlockPos, ChunkPos, DimensionId};

use crate::block::{self, StarlightBlocks};
use crate::event_bus::{self, ChangeCollector, NetworkChangeBatch};
use crate::metrics::{Metrics, MetricsSnapshot};

pub struct StarlightHost {
    worlds: BTreeMap<DimensionId, World>,
    network: NetworkContext,
    catalog: StarlightBlocks,
    changes: ChangeCollector,
    bus: broadcast::Sender<NetworkChangeBatch>,
    metrics: Arc<Metrics>,
}

impl StarlightHost {
    pub fn new(config: TransmissionConfig, backend: Box<dyn CacheBackend>) -> Self {
        let mut network = NetworkContext::new(config, backend);
        let changes = ChangeCollector::new();
        network.add_observer(Box::new(changes.clone()));
        let (bus, _) = broadcast::channel(event_bus::BUS_CAPACITY);
        Self {
            worlds: BTreeMap::new(),
            network,
            catalog: StarlightBlocks,
            changes,
            bus,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkChangeBatch> {
        self.bus.subscribe()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn network(&self) -> &NetworkContext {
        &self.network
    }

    pub fn world(&self, dimension: DimensionId) -> Option<&World> {
        self.worlds.get(&dimension)
    }

    /// Dimensions with block storage, in id order.
    pub fn dimensions(&self) -> Vec<DimensionId> {
        self.worlds.keys().copied().collect()
    }

    /// Persisted node count of a dimension, zero if it is not tracked.
    pub fn node_count(&self, dimension: DimensionId) -> usize {
        self.network
            .existing_handler(dimension)
            .map_or(0, |h| h.registry().persisted_count())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Store generated or loaded block data without streaming it in.
    pub fn insert_chunk(&mut self, dimension: DimensionId, pos: ChunkPos, chunk: Chunk) {
        self.worlds.entry(dimension).or_default().insert_chunk(pos, chunk);
    }

    /// Bring a dimension up. Block data inserted beforehand is kept.
    pub fn load_world(&mut self, dimension: DimensionId) {
        let world = self.worlds.entry(dimension).or_default();
        let view = world.view(&self.catalog);
        self.network.on_world_load(dimension, &view);
        tracing::info!("Loaded {} ({} persisted nodes)", dimension, self.node_count(dimension));
        self.publish();
    }

    pub fn unload_world(&mut self, dimension: DimensionId) {
        self.network.on_world_unload(dimension);
        self.worlds.remove(&dimension);
        self.publish();
    }

    pub fn load_chunk(&mut self, dimension: DimensionId, chunk: ChunkPos) {
        let world = self.worlds.entry(dimension).or_default();
        if !world.mark_loaded(chunk) {
            return;
        }
        self.network.on_chunk_load(dimension, chunk);
        self.publish();
    }

    pub fn unload_chunk(&mut self, dimension: DimensionId, chunk: ChunkPos) {
        let Some(world) = self.worlds.get(&dimension) else {
            return;
        };
        if !world.mark_unloaded(chunk) {
            return;
        }
        self.network.on_chunk_unload(dimension, chunk);
        self.publish();
    }

    // ── Blocks & devices ─────────────────────────────────────────────────

    /// Place a starlight device: its block goes into the world, its node
    /// into the network. On failure the previous block is put back.
    pub fn place_device(
        &mut self,
        dimension: DimensionId,
        pos: BlockPos,
        capability: NodeCapability,
    ) -> Result<NodeId, NetworkError> {
        let world = self.worlds.entry(dimension).or_default();
        let previous = world.set_block(pos, block::device_block(capability.kind()));

        let node = NetworkNode::new(dimension, pos, capability);
        let id = node.id;
        match self.network.create(node) {
            Ok(()) => {
                // Placed in a chunk that isn't streamed in: persisted only,
                // until that chunk loads.
                let loaded = self.worlds.get(&dimension).is_some_and(|w| w.is_loaded(pos.chunk()));
                if !loaded {
                    if let Err(err) = self.network.deactivate(id) {
                        tracing::warn!("Could not park {}: {}", id, err);
                    }
                }
                self.metrics.node_created();
                self.publish();
                Ok(id)
            }
            Err(err) => {
                if let Some(world) = self.worlds.get(&dimension) {
                    world.set_block(pos, previous);
                }
                Err(err)
            }
        }
    }

    /// Write a block. Replacing a device removes its node; any change near
    /// active nodes invalidates their links. Returns the previous block.
    pub fn set_block(&mut self, dimension: DimensionId, pos: BlockPos, new: BlockId) -> BlockId {
        let world = self.worlds.entry(dimension).or_default();
        let old = world.set_block(pos, new);

        let old_kind = block::device_kind(old);
        if old_kind.is_some() && old_kind != block::device_kind(new) {
            match self.network.remove(NodeId::new(dimension, pos)) {
                Ok(_) => self.metrics.node_removed(),
                Err(NetworkError::UnknownNode { id }) => {
                    tracing::debug!("Device block at {} had no node", id)
                }
                Err(err) => tracing::warn!("Removing device node: {}", err),
            }
        }
        self.network.on_block_changed(dimension, pos);
        self.publish();
        old
    }

    pub fn break_block(&mut self, dimension: DimensionId, pos: BlockPos) -> BlockId {
        self.set_block(dimension, pos, block::AIR)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Best path from `source` to the nearest `target` node. `max_hops`
    /// defaults to the configured cap.
    pub fn query(&mut self, source: NodeId, target: NodeKind, max_hops: Option<usize>) -> QueryResult {
        let started = Instant::now();
        let max_hops = max_hops.unwrap_or(self.network.config().default_max_hops);
        let result = match self.worlds.get(&source.dimension) {
            Some(world) => {
                let view = world.view(&self.catalog);
                self.network.query(&view, source, target, max_hops)
            }
            None => QueryResult::NoPathFound,
        };
        self.metrics.record_query(result.is_found(), started.elapsed());
        result
    }

    pub fn deliverable(&mut self, sink: NodeId) -> f64 {
        match self.worlds.get(&sink.dimension) {
            Some(world) => {
                let view = world.view(&self.catalog);
                self.network.deliverable(&view, sink)
            }
            None => 0.0,
        }
    }

    pub fn gateways(&mut self, dimension: DimensionId) -> Result<Vec<GatewayEntry>> {
        self.network
            .gateways(dimension)
            .with_context(|| format!("loading gateway list of {dimension}"))
    }

    /// The link graph of a dimension in Graphviz DOT form.
    pub fn dot(&mut self, dimension: DimensionId) -> Option<String> {
        let world = self.worlds.get(&dimension)?;
        let view = world.view(&self.catalog);
        self.network.graph(dimension, &view).map(|graph| graph.to_dot())
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    pub fn check_integrity(&mut self, dimension: DimensionId) -> Result<IntegrityReport> {
        let world = self
            .worlds
            .get(&dimension)
            .with_context(|| format!("{dimension} has no block data to check against"))?;
        let view = world.view(&self.catalog);
        let report = self
            .network
            .run_full_check(dimension, &view)
            .with_context(|| format!("integrity check of {dimension}"))?;
        self.metrics.nodes_pruned(report.dropped() as u64);
        self.publish();
        Ok(report)
    }

    pub fn save_all(&mut self) -> Result<usize> {
        let start = Instant::now();
        let written = self.network.save_all().context("saving starlight caches")?;
        self.metrics.records_saved(written as u64);
        if written > 0 {
            tracing::info!("Saved {} starlight records ({:.2?})", written, start.elapsed());
        }
        Ok(written)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (rebuilds, active) = self
            .network
            .dimensions()
            .into_iter()
            .filter_map(|dim| self.network.existing_handler(dim))
            .fold((0, 0), |(rebuilds, active), h| {
                (rebuilds + h.rebuild_count(), active + h.registry().active_count() as u64)
            });
        self.metrics.snapshot(rebuilds, active)
    }

    fn publish(&self) {
        self.changes.publish(&self.bus);
    }
}
