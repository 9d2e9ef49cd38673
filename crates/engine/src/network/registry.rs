use std::collections::HashSet;

use super::chunk_index::ChunkIndex;
use super::node::{NetworkNode, NodeId};
use super::store::NodeSet;
use super::NetworkError;
use crate::world::position::ChunkPos;

/// The sole mutation surface for a dimension's nodes.
///
/// Owns the persisted [`NodeSet`], the subset of it that is currently
/// active, and the chunk index tying both to chunk columns. Every operation
/// is a hash lookup or two; none of them touch the link graph, which is the
/// handler's business.
#[derive(Debug)]
pub struct NodeRegistry {
    store: NodeSet,
    active: HashSet<NodeId>,
    index: ChunkIndex,
    /// Store changed since it was loaded or last persisted.
    modified: bool,
}

impl NodeRegistry {
    /// Wrap a loaded store. Nothing starts active: nodes wake up as their
    /// chunks load.
    pub fn from_store(store: NodeSet) -> Self {
        let mut index = ChunkIndex::new();
        for node in store.iter() {
            index.insert(node.chunk(), node.id);
        }
        Self {
            store,
            active: HashSet::new(),
            index,
            modified: false,
        }
    }

    /// Give the store back, along with whether it needs writing.
    pub fn into_store(self) -> (NodeSet, bool) {
        (self.store, self.modified)
    }

    pub fn store(&self) -> &NodeSet {
        &self.store
    }

    pub fn get(&self, id: &NodeId) -> Option<&NetworkNode> {
        self.store.get(id)
    }

    pub fn is_active(&self, id: &NodeId) -> bool {
        self.active.contains(id)
    }

    /// Active nodes, in no particular order.
    pub fn active_nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.active.iter().filter_map(|id| self.store.get(id))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn persisted_count(&self) -> usize {
        self.store.len()
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    /// Mark a persisted node active. `Ok(false)` if it already was.
    pub fn activate(&mut self, id: NodeId) -> Result<bool, NetworkError> {
        if !self.store.contains(&id) {
            return Err(NetworkError::UnknownNode { id });
        }
        Ok(self.active.insert(id))
    }

    /// Drop a node from the active set, keeping its persisted data.
    /// `Ok(false)` if it was not active.
    pub fn deactivate(&mut self, id: NodeId) -> Result<bool, NetworkError> {
        if !self.store.contains(&id) {
            return Err(NetworkError::UnknownNode { id });
        }
        Ok(self.active.remove(&id))
    }

    /// Add a brand-new node, active immediately.
    pub fn create(&mut self, node: NetworkNode) -> Result<(), NetworkError> {
        let id = node.id;
        let chunk = node.chunk();
        self.store.insert(node)?;
        self.index.insert(chunk, id);
        self.active.insert(id);
        self.modified = true;
        Ok(())
    }

    /// Delete a node from both active and persisted state.
    pub fn remove(&mut self, id: NodeId) -> Result<NetworkNode, NetworkError> {
        let node = self
            .store
            .remove(&id)
            .ok_or(NetworkError::UnknownNode { id })?;
        self.active.remove(&id);
        self.index.remove(node.chunk(), &id);
        self.modified = true;
        Ok(node)
    }

    /// Activate every indexed node in `chunk`. Returns the ids that changed.
    pub fn activate_chunk(&mut self, chunk: ChunkPos) -> Vec<NodeId> {
        let ids: Vec<NodeId> = self.index.nodes_in(chunk).collect();
        ids.into_iter()
            .filter(|id| self.store.contains(id) && self.active.insert(*id))
            .collect()
    }

    /// Deactivate every indexed node in `chunk`. Returns the ids that changed.
    pub fn deactivate_chunk(&mut self, chunk: ChunkPos) -> Vec<NodeId> {
        let ids: Vec<NodeId> = self.index.nodes_in(chunk).collect();
        ids.into_iter().filter(|id| self.active.remove(id)).collect()
    }

    /// Drop quarantined records from the store. Returns them for reporting.
    pub fn purge_quarantine(&mut self) -> Vec<super::store::QuarantinedRecord> {
        let purged = self.store.take_quarantined();
        if !purged.is_empty() {
            self.modified = true;
        }
        purged
    }
}
