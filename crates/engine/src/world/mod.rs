pub mod block;
pub mod chunk;
pub mod position;

use block::{BlockCatalog, BlockId};
use chunk::Chunk;
use dashmap::{DashMap, DashSet};
use position::{BlockPos, ChunkPos};

use crate::network::NodeKind;

/// Read access to block state, as needed by link computation (opacity) and
/// the integrity checker (what device actually sits at a position).
pub trait BlockAccess {
    fn is_opaque(&self, pos: BlockPos) -> bool;
    fn node_kind_at(&self, pos: BlockPos) -> Option<NodeKind>;
}

/// Block storage for one dimension. Thread-safe, lock-sharded by chunk.
///
/// Holds every chunk the dimension knows about; `loaded` tracks which of them
/// are currently streamed in. Block reads do not care whether a chunk is
/// loaded, which is what lets the integrity checker inspect nodes in
/// chunks nobody is looking at.
pub struct World {
    chunks: DashMap<ChunkPos, Chunk>,
    loaded: DashSet<ChunkPos>,
}

impl World {
    pub fn new() -> Self {
        Self {
            chunks: DashMap::new(),
            loaded: DashSet::new(),
        }
    }

    /// Read a block at an absolute position. Returns AIR for unknown chunks.
    pub fn get_block(&self, pos: BlockPos) -> BlockId {
        match self.chunks.get(&pos.chunk()) {
            Some(chunk) => chunk.get_block(pos.local()),
            None => BlockId::AIR,
        }
    }

    /// Write a block at an absolute position, creating the chunk if needed.
    /// Returns the previous block.
    pub fn set_block(&self, pos: BlockPos, block: BlockId) -> BlockId {
        self.chunks
            .entry(pos.chunk())
            .or_default()
            .set_block(pos.local(), block)
    }

    /// Insert chunk data without loading it.
    pub fn insert_chunk(&self, pos: ChunkPos, chunk: Chunk) {
        self.chunks.insert(pos, chunk);
    }

    pub fn has_chunk(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    /// Mark a chunk as streamed in. Returns `false` if it already was.
    pub fn mark_loaded(&self, pos: ChunkPos) -> bool {
        self.chunks.entry(pos).or_default();
        self.loaded.insert(pos)
    }

    /// Mark a chunk as streamed out. Returns `false` if it was not loaded.
    pub fn mark_unloaded(&self, pos: ChunkPos) -> bool {
        self.loaded.remove(&pos).is_some()
    }

    pub fn is_loaded(&self, pos: ChunkPos) -> bool {
        self.loaded.contains(&pos)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Snapshot of the loaded chunk set.
    pub fn loaded_chunks(&self) -> Vec<ChunkPos> {
        let mut out: Vec<ChunkPos> = self.loaded.iter().map(|entry| *entry).collect();
        out.sort();
        out
    }

    /// Read-only view that interprets blocks through `catalog`.
    pub fn view<'a>(&'a self, catalog: &'a dyn BlockCatalog) -> WorldView<'a> {
        WorldView {
            world: self,
            catalog,
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`World`] paired with the game's block catalog.
#[derive(Clone, Copy)]
pub struct WorldView<'a> {
    world: &'a World,
    catalog: &'a dyn BlockCatalog,
}

impl BlockAccess for WorldView<'_> {
    fn is_opaque(&self, pos: BlockPos) -> bool {
        self.catalog.is_opaque(self.world.get_block(pos))
    }

    fn node_kind_at(&self, pos: BlockPos) -> Option<NodeKind> {
        self.catalog.node_kind(self.world.get_block(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Catalog;

    impl BlockCatalog for Catalog {
        fn is_opaque(&self, id: BlockId) -> bool {
            id == BlockId(1)
        }

        fn node_kind(&self, id: BlockId) -> Option<NodeKind> {
            (id == BlockId(2)).then_some(NodeKind::Relay)
        }
    }

    #[test]
    fn view_reads_unloaded_chunks() {
        let world = World::new();
        world.set_block(BlockPos::new(40, 64, 40), BlockId(1));
        world.set_block(BlockPos::new(41, 64, 40), BlockId(2));
        assert!(!world.is_loaded(ChunkPos::new(2, 2)));

        let view = world.view(&Catalog);
        assert!(view.is_opaque(BlockPos::new(40, 64, 40)));
        assert_eq!(view.node_kind_at(BlockPos::new(41, 64, 40)), Some(NodeKind::Relay));
        assert_eq!(view.node_kind_at(BlockPos::new(42, 64, 40)), None);
    }

    #[test]
    fn load_flags_are_idempotent() {
        let world = World::new();
        let pos = ChunkPos::new(-3, 7);
        assert!(world.mark_loaded(pos));
        assert!(!world.mark_loaded(pos));
        assert_eq!(world.loaded_chunks(), vec![pos]);
        assert!(world.mark_unloaded(pos));
        assert!(!world.mark_unloaded(pos));
        assert!(world.has_chunk(pos));
    }
}
