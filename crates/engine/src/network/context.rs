use std::collections::BTreeMap;
use std::sync::Arc;

use super::gateway::{GatewayCache, GatewayEntry};
use super::handler::NetworkHandler;
use super::integrity::{self, IntegrityReport};
use super::link::TransmissionGraph;
use super::node::{NetworkNode, NodeCapability, NodeId, NodeKind};
use super::path::QueryResult;
use super::store::NodeSet;
use super::{NetworkChange, NetworkError, NetworkObserver};
use crate::cache::{CacheBackend, CacheError, WorldCacheManager};
use crate::config::TransmissionConfig;
use crate::world::BlockAccess;
use crate::world::position::{BlockPos, ChunkPos, DimensionId};

/// Hooks the host calls as chunks and worlds come and go.
pub trait ChunkLifecycle {
    fn on_chunk_load(&mut self, dimension: DimensionId, chunk: ChunkPos);
    fn on_chunk_unload(&mut self, dimension: DimensionId, chunk: ChunkPos);
    /// Runs the integrity check first when the config asks for it.
    fn on_world_load(&mut self, dimension: DimensionId, blocks: &dyn BlockAccess);
    /// Hands the node set back to the cache, saves and forgets the dimension.
    fn on_world_unload(&mut self, dimension: DimensionId);
}

/// Every dimension's network, plus the cache that persists them.
///
/// Handlers are created on first use by checking the dimension's
/// [`NodeSet`] out of the cache; they check it back in on world unload.
/// One handler per dimension, for as long as that dimension is loaded.
pub struct NetworkContext {
    config: Arc<TransmissionConfig>,
    caches: WorldCacheManager,
    handlers: BTreeMap<DimensionId, NetworkHandler>,
    observers: Vec<Box<dyn NetworkObserver>>,
}

impl NetworkContext {
    pub fn new(config: TransmissionConfig, backend: Box<dyn CacheBackend>) -> Self {
        Self {
            config: Arc::new(config),
            caches: WorldCacheManager::new(backend),
            handlers: BTreeMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &TransmissionConfig {
        &self.config
    }

    pub fn add_observer(&mut self, observer: Box<dyn NetworkObserver>) {
        self.observers.push(observer);
    }

    /// The dimension's handler, creating it on first use.
    pub fn handler(&mut self, dimension: DimensionId) -> Result<&mut NetworkHandler, CacheError> {
        Self::handler_entry(&mut self.handlers, &mut self.caches, &self.config, dimension)
    }

    /// The dimension's handler, if it has one.
    pub fn existing_handler(&self, dimension: DimensionId) -> Option<&NetworkHandler> {
        self.handlers.get(&dimension)
    }

    pub fn is_tracking(&self, dimension: DimensionId) -> bool {
        self.handlers.contains_key(&dimension)
    }

    /// Dimensions with a live handler, in id order.
    pub fn dimensions(&self) -> Vec<DimensionId> {
        self.handlers.keys().copied().collect()
    }

    pub fn create(&mut self, node: NetworkNode) -> Result<(), NetworkError> {
        let dimension = node.dimension();
        let id = node.id;
        let gateway_name = match &node.capability {
            NodeCapability::Gateway { name, .. } => Some(name.clone()),
            _ => None,
        };

        // Load the directory up front so a failure leaves the network untouched.
        if gateway_name.is_some() {
            self.caches.get_or_load::<GatewayCache>(dimension)?;
        }
        Self::handler_entry(&mut self.handlers, &mut self.caches, &self.config, dimension)?.create(node)?;

        if let Some(name) = gateway_name {
            self.caches.get_or_load::<GatewayCache>(dimension)?.insert(id.pos, name);
            self.caches.mark_dirty::<GatewayCache>(dimension);
        }
        self.notify(dimension, NetworkChange::NodeCreated(id));
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> Result<NetworkNode, NetworkError> {
        let dimension = id.dimension;
        let is_gateway = Self::handler_entry(&mut self.handlers, &mut self.caches, &self.config, dimension)?
            .registry()
            .get(&id)
            .is_some_and(|node| node.kind() == NodeKind::Gateway);
        if is_gateway {
            self.caches.get_or_load::<GatewayCache>(dimension)?;
        }
        let node = Self::handler_entry(&mut self.handlers, &mut self.caches, &self.config, dimension)?.remove(id)?;

        if node.kind() == NodeKind::Gateway {
            self.caches.get_or_load::<GatewayCache>(dimension)?.remove(&id.pos);
            self.caches.mark_dirty::<GatewayCache>(dimension);
        }
        self.notify(dimension, NetworkChange::NodeRemoved(id));
        Ok(node)
    }

    /// Take a node out of the active set, keeping its persisted data.
    /// `Ok(false)` if it was not active.
    pub fn deactivate(&mut self, id: NodeId) -> Result<bool, NetworkError> {
        Self::handler_entry(&mut self.handlers, &mut self.caches, &self.config, id.dimension)?.deactivate(id)
    }

    /// Best path from `source` to the nearest-by-loss active node of kind
    /// `target`. Sources in dimensions without a handler find nothing.
    pub fn query<B: BlockAccess + Sync + ?Sized>(
        &mut self,
        blocks: &B,
        source: NodeId,
        target: NodeKind,
        max_hops: usize,
    ) -> QueryResult {
        match self.handlers.get_mut(&source.dimension) {
            Some(handler) => handler.query(blocks, source, target, max_hops),
            None => QueryResult::NoPathFound,
        }
    }

    /// See [`NetworkHandler::deliverable`].
    pub fn deliverable<B: BlockAccess + Sync + ?Sized>(&mut self, blocks: &B, sink: NodeId) -> f64 {
        match self.handlers.get_mut(&sink.dimension) {
            Some(handler) => handler.deliverable(blocks, sink),
            None => 0.0,
        }
    }

    /// Current link graph of a tracked dimension.
    pub fn graph<B: BlockAccess + Sync + ?Sized>(
        &mut self,
        dimension: DimensionId,
        blocks: &B,
    ) -> Option<&TransmissionGraph> {
        self.handlers.get_mut(&dimension).map(|handler| handler.graph(blocks))
    }

    /// Named gateways of a dimension, in position order.
    pub fn gateways(&mut self, dimension: DimensionId) -> Result<Vec<GatewayEntry>, CacheError> {
        Ok(self.caches.get_or_load::<GatewayCache>(dimension)?.entries())
    }

    /// A block changed. Links are invalidated if any active node is close
    /// enough for a beam to pass through it.
    pub fn on_block_changed(&mut self, dimension: DimensionId, pos: BlockPos) {
        let Some(handler) = self.handlers.get_mut(&dimension) else {
            return;
        };
        let reach = handler.config().kinds.max_range();
        let near = handler
            .registry()
            .active_nodes()
            .any(|node| node.position.distance(&pos) <= reach);
        if !near || handler.is_dirty() {
            return;
        }
        handler.mark_dirty();
        self.notify(dimension, NetworkChange::LinksInvalidated(pos));
    }

    /// Check every persisted node of `dimension` against the world, drop the
    /// ones that no longer match and prune the gateway list to match.
    pub fn run_full_check<B: BlockAccess + ?Sized>(
        &mut self,
        dimension: DimensionId,
        blocks: &B,
    ) -> Result<IntegrityReport, CacheError> {
        let handler = Self::handler_entry(&mut self.handlers, &mut self.caches, &self.config, dimension)?;
        let report = integrity::check(handler, blocks);
        let store = handler.registry().store();

        let gateways = self.caches.get_or_load::<GatewayCache>(dimension)?;
        let pruned = gateways.retain(|pos, _| {
            store
                .get(&NodeId::new(dimension, *pos))
                .is_some_and(|node| node.kind() == NodeKind::Gateway)
        });
        // Entries missing from the directory (older saves, failed writes)
        // or carrying an outdated name are rebuilt from the node set.
        let mut restored = 0;
        for node in store.iter() {
            let NodeCapability::Gateway { name, .. } = &node.capability else {
                continue;
            };
            if gateways.name(&node.position) != Some(name.as_str()) {
                gateways.insert(node.position, name.clone());
                restored += 1;
            }
        }
        if pruned + restored > 0 {
            self.caches.mark_dirty::<GatewayCache>(dimension);
        }

        tracing::info!(
            "Integrity check of {}: {} records checked, {} stale, {} corrupt, {} gateway entries pruned, {} restored",
            dimension,
            report.checked,
            report.stale,
            report.corrupt,
            pruned,
            restored
        );
        if report.dropped() > 0 {
            self.notify(
                dimension,
                NetworkChange::IntegrityPruned {
                    dropped: report.dropped(),
                },
            );
        }
        Ok(report)
    }

    /// Write a dimension's changed records. Returns how many were written.
    pub fn save(&mut self, dimension: DimensionId) -> Result<usize, CacheError> {
        let mut written = 0;
        if let Some(handler) = self.handlers.get_mut(&dimension) {
            if handler.registry().is_modified() {
                self.caches.persist(dimension, handler.registry().store())?;
                handler.registry_mut().clear_modified();
                written += 1;
            }
        }
        Ok(written + self.caches.save(dimension)?)
    }

    pub fn save_all(&mut self) -> Result<usize, CacheError> {
        let mut dimensions = self.caches.dimensions();
        for dimension in self.handlers.keys() {
            if !dimensions.contains(dimension) {
                dimensions.push(*dimension);
            }
        }
        let mut written = 0;
        for dimension in dimensions {
            written += self.save(dimension)?;
        }
        Ok(written)
    }

    fn handler_entry<'a>(
        handlers: &'a mut BTreeMap<DimensionId, NetworkHandler>,
        caches: &mut WorldCacheManager,
        config: &Arc<TransmissionConfig>,
        dimension: DimensionId,
    ) -> Result<&'a mut NetworkHandler, CacheError> {
        if !handlers.contains_key(&dimension) {
            let store = caches.checkout::<NodeSet>(dimension)?;
            tracing::debug!("Tracking {} with {} persisted nodes", dimension, store.len());
            handlers.insert(dimension, NetworkHandler::new(store, Arc::clone(config)));
        }
        match handlers.get_mut(&dimension) {
            Some(handler) => Ok(handler),
            None => unreachable!("handler inserted above"),
        }
    }

    fn notify(&self, dimension: DimensionId, change: NetworkChange) {
        for observer in &self.observers {
            observer.network_changed(dimension, &change);
        }
    }
}

impl ChunkLifecycle for NetworkContext {
    fn on_chunk_load(&mut self, dimension: DimensionId, chunk: ChunkPos) {
        let handler = match Self::handler_entry(&mut self.handlers, &mut self.caches, &self.config, dimension) {
            Ok(handler) => handler,
            Err(err) => {
                tracing::error!("Cannot track network in {}: {}", dimension, err);
                return;
            }
        };
        let activated = handler.activate_chunk(chunk);
        if !activated.is_empty() {
            self.notify(
                dimension,
                NetworkChange::ChunkActivated {
                    chunk,
                    nodes: activated.len(),
                },
            );
        }
    }

    fn on_chunk_unload(&mut self, dimension: DimensionId, chunk: ChunkPos) {
        let Some(handler) = self.handlers.get_mut(&dimension) else {
            return;
        };
        let deactivated = handler.deactivate_chunk(chunk);
        if !deactivated.is_empty() {
            self.notify(
                dimension,
                NetworkChange::ChunkDeactivated {
                    chunk,
                    nodes: deactivated.len(),
                },
            );
        }
    }

    fn on_world_load(&mut self, dimension: DimensionId, blocks: &dyn BlockAccess) {
        if let Err(err) = self.handler(dimension) {
            tracing::error!("Cannot track network in {}: {}", dimension, err);
            return;
        }
        if self.config.integrity_check_on_load {
            if let Err(err) = self.run_full_check(dimension, blocks) {
                tracing::error!("Integrity check of {} failed: {}", dimension, err);
            }
        }
    }

    fn on_world_unload(&mut self, dimension: DimensionId) {
        if let Some(handler) = self.handlers.remove(&dimension) {
            let (store, modified) = handler.into_store();
            let nodes = store.len();
            if let Err(err) = self.caches.checkin(dimension, store, modified) {
                tracing::error!("Returning node set of {}: {}", dimension, err);
            }
            tracing::debug!("Released {} ({} nodes)", dimension, nodes);
        }
        match self.caches.unload(dimension) {
            Ok(written) => tracing::info!("Unloaded {}, wrote {} records", dimension, written),
            Err(err) => tracing::error!("Saving {} on unload: {}", dimension, err),
        }
        self.notify(dimension, NetworkChange::WorldUnloaded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheRecord, MemoryBackend};
    use crate::network::node::{Constellation, GatewayTarget};
    use std::sync::Mutex;

    const DIM: DimensionId = DimensionId::OVERWORLD;

    struct Open;

    impl BlockAccess for Open {
        fn is_opaque(&self, _pos: BlockPos) -> bool {
            false
        }

        fn node_kind_at(&self, _pos: BlockPos) -> Option<NodeKind> {
            None
        }
    }

    struct Recorder(Arc<Mutex<Vec<NetworkChange>>>);

    impl NetworkObserver for Recorder {
        fn network_changed(&self, _dimension: DimensionId, change: &NetworkChange) {
            self.0.lock().unwrap().push(change.clone());
        }
    }

    fn context(backend: &MemoryBackend) -> NetworkContext {
        NetworkContext::new(TransmissionConfig::default(), Box::new(backend.clone()))
    }

    fn collector(x: i64, z: i64) -> NetworkNode {
        NetworkNode::new(
            DIM,
            BlockPos::new(x, 64, z),
            NodeCapability::Collector { rate: 2.0, attunement: Constellation::Discidia },
        )
    }

    fn consumer(x: i64, z: i64) -> NetworkNode {
        NetworkNode::new(DIM, BlockPos::new(x, 64, z), NodeCapability::Consumer { demand: 4.0 })
    }

    #[test]
    fn nodes_survive_a_world_reload() {
        let backend = MemoryBackend::new();
        let mut ctx = context(&backend);
        let c = collector(0, 0);
        let k = consumer(0, 10);
        ctx.create(c.clone()).unwrap();
        ctx.create(k.clone()).unwrap();
        ctx.on_world_unload(DIM);
        assert!(!ctx.is_tracking(DIM));
        assert!(backend.contains(DIM, NodeSet::KEY));

        let mut ctx = context(&backend);
        ctx.on_world_load(DIM, &Open);
        assert_eq!(ctx.query(&Open, c.id, NodeKind::Consumer, 4), QueryResult::NoPathFound);

        ctx.on_chunk_load(DIM, ChunkPos::new(0, 0));
        let path = ctx.query(&Open, c.id, NodeKind::Consumer, 4).into_path().unwrap();
        assert_eq!(path.nodes, vec![c.id, k.id]);
    }

    #[test]
    fn observers_hear_lifecycle_changes() {
        let backend = MemoryBackend::new();
        let mut ctx = context(&backend);
        let seen = Arc::new(Mutex::new(Vec::new()));
        ctx.add_observer(Box::new(Recorder(Arc::clone(&seen))));

        let c = collector(1, 1);
        ctx.create(c.clone()).unwrap();
        ctx.on_chunk_unload(DIM, ChunkPos::new(0, 0));
        ctx.on_chunk_load(DIM, ChunkPos::new(0, 0));
        ctx.remove(c.id).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                NetworkChange::NodeCreated(c.id),
                NetworkChange::ChunkDeactivated { chunk: ChunkPos::new(0, 0), nodes: 1 },
                NetworkChange::ChunkActivated { chunk: ChunkPos::new(0, 0), nodes: 1 },
                NetworkChange::NodeRemoved(c.id),
            ]
        );
    }

    #[test]
    fn gateways_are_listed_and_forgotten() {
        let backend = MemoryBackend::new();
        let mut ctx = context(&backend);
        let pos = BlockPos::new(5, 70, 5);
        let gateway = NetworkNode::new(
            DIM,
            pos,
            NodeCapability::Gateway {
                name: "spire".into(),
                destinations: vec![GatewayTarget { dimension: DimensionId::END, pos: BlockPos::new(0, 64, 0) }],
            },
        );
        ctx.create(gateway.clone()).unwrap();
        assert_eq!(ctx.gateways(DIM).unwrap(), vec![GatewayEntry { pos, name: "spire".into() }]);

        ctx.remove(gateway.id).unwrap();
        assert!(ctx.gateways(DIM).unwrap().is_empty());
    }

    #[test]
    fn nearby_block_changes_invalidate_links() {
        let backend = MemoryBackend::new();
        let mut ctx = context(&backend);
        ctx.create(collector(0, 0)).unwrap();
        ctx.graph(DIM, &Open).unwrap();
        assert!(!ctx.existing_handler(DIM).unwrap().is_dirty());

        ctx.on_block_changed(DIM, BlockPos::new(500, 64, 500));
        assert!(!ctx.existing_handler(DIM).unwrap().is_dirty());

        ctx.on_block_changed(DIM, BlockPos::new(3, 64, 3));
        assert!(ctx.existing_handler(DIM).unwrap().is_dirty());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let backend = MemoryBackend::new();
        let mut ctx = context(&backend);
        ctx.create(collector(0, 0)).unwrap();
        let err = ctx.create(consumer(0, 0)).unwrap_err();
        assert!(matches!(err, NetworkError::DuplicateNode { .. }));
        assert_eq!(ctx.existing_handler(DIM).unwrap().registry().persisted_count(), 1);
    }

    #[test]
    fn save_writes_only_when_changed() {
        let backend = MemoryBackend::new();
        let mut ctx = context(&backend);
        ctx.create(collector(0, 0)).unwrap();
        assert_eq!(ctx.save_all().unwrap(), 1);
        assert_eq!(ctx.save_all().unwrap(), 0);
        assert!(backend.contains(DIM, NodeSet::KEY));
    }

    fn gateway(name: &str, pos: BlockPos) -> NetworkNode {
        NetworkNode::new(
            DIM,
            pos,
            NodeCapability::Gateway { name: name.into(), destinations: Vec::new() },
        )
    }

    #[test]
    fn unreadable_gateway_directory_leaves_the_network_untouched() {
        let backend = MemoryBackend::new();
        let pos = BlockPos::new(2, 64, 2);
        {
            let mut ctx = context(&backend);
            ctx.create(gateway("dock", pos)).unwrap();
            ctx.on_world_unload(DIM);
        }
        backend.insert_raw(DIM, GatewayCache::KEY, b"not nbt".to_vec());

        let mut ctx = context(&backend);
        let seen = Arc::new(Mutex::new(Vec::new()));
        ctx.add_observer(Box::new(Recorder(Arc::clone(&seen))));

        let id = NodeId::new(DIM, pos);
        assert!(matches!(ctx.remove(id), Err(NetworkError::Cache(_))));
        assert!(ctx.existing_handler(DIM).unwrap().registry().get(&id).is_some());

        let other = gateway("quay", BlockPos::new(9, 64, 9));
        assert!(matches!(ctx.create(other.clone()), Err(NetworkError::Cache(_))));
        assert!(ctx.existing_handler(DIM).unwrap().registry().get(&other.id).is_none());
        assert!(seen.lock().unwrap().is_empty());

        // Other kinds never touch the directory.
        ctx.create(collector(0, 0)).unwrap();
    }

    struct GatewayBlocks(Vec<BlockPos>);

    impl BlockAccess for GatewayBlocks {
        fn is_opaque(&self, _pos: BlockPos) -> bool {
            false
        }

        fn node_kind_at(&self, pos: BlockPos) -> Option<NodeKind> {
            self.0.contains(&pos).then_some(NodeKind::Gateway)
        }
    }

    #[test]
    fn integrity_check_lists_gateways_from_older_saves() {
        use crate::network::store::{NodeRecordV1, NodeSetSchemaV1};
        use crate::cache::codec;

        let backend = MemoryBackend::new();
        let old = NodeSetSchemaV1 {
            nodes: vec![NodeRecordV1 {
                x: 4,
                y: 64,
                z: 4,
                kind: "gateway".into(),
                rate: None,
                attunement: None,
                name: Some("Old Gate".into()),
                demand: None,
            }],
        };
        backend.insert_raw(DIM, NodeSet::KEY, codec::encode_versioned(NodeSet::KEY, 1, &old).unwrap());

        let mut ctx = context(&backend);
        ctx.on_world_load(DIM, &Open);
        assert!(ctx.gateways(DIM).unwrap().is_empty());

        let pos = BlockPos::new(4, 64, 4);
        let report = ctx.run_full_check(DIM, &GatewayBlocks(vec![pos])).unwrap();
        assert!(report.is_clean());
        assert_eq!(ctx.gateways(DIM).unwrap(), vec![GatewayEntry { pos, name: "Old Gate".into() }]);

        ctx.on_world_unload(DIM);
        assert!(backend.contains(DIM, GatewayCache::KEY));
    }
}
