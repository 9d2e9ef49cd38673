use std::collections::{BTreeSet, HashMap};

use super::node::NodeId;
use crate::world::position::ChunkPos;

/// Chunk column → ids of the nodes believed to sit in it, loaded or not.
///
/// Sets are ordered so chunk activation walks nodes in id order.
#[derive(Debug, Default)]
pub struct ChunkIndex {
    chunks: HashMap<ChunkPos, BTreeSet<NodeId>>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk: ChunkPos, id: NodeId) -> bool {
        self.chunks.entry(chunk).or_default().insert(id)
    }

    pub fn remove(&mut self, chunk: ChunkPos, id: &NodeId) -> bool {
        let Some(ids) = self.chunks.get_mut(&chunk) else {
            return false;
        };
        let removed = ids.remove(id);
        if ids.is_empty() {
            self.chunks.remove(&chunk);
        }
        removed
    }

    pub fn nodes_in(&self, chunk: ChunkPos) -> impl Iterator<Item = NodeId> + '_ {
        self.chunks.get(&chunk).into_iter().flatten().copied()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn node_count(&self) -> usize {
        self.chunks.values().map(BTreeSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::position::{BlockPos, DimensionId};

    #[test]
    fn empty_chunks_are_dropped() {
        let mut index = ChunkIndex::new();
        let pos = BlockPos::new(3, 64, -2);
        let id = NodeId::new(DimensionId::OVERWORLD, pos);
        assert!(index.insert(pos.chunk(), id));
        assert!(!index.insert(pos.chunk(), id));
        assert_eq!(index.nodes_in(pos.chunk()).collect::<Vec<_>>(), vec![id]);

        assert!(index.remove(pos.chunk(), &id));
        assert!(!index.remove(pos.chunk(), &id));
        assert_eq!(index.chunk_count(), 0);
        assert_eq!(index.nodes_in(pos.chunk()).count(), 0);
    }
}
