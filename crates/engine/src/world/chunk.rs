use super::block::BlockId;
use super::position::LocalBlockPos;
use std::collections::HashMap;

/// Number of blocks along each axis of a chunk section.
pub const SECTION_SIZE: usize = 16;
/// Total block count in one section.
const SECTION_VOLUME: usize = SECTION_SIZE * SECTION_SIZE * SECTION_SIZE;

/// A 16x16x16 cube of blocks, YZX order, with a running count of non-air
/// cells so emptiness checks are O(1).
#[derive(Clone)]
pub struct ChunkSection {
    blocks: Box<[BlockId; SECTION_VOLUME]>,
    non_air: u16,
}

impl ChunkSection {
    pub fn new_empty() -> Self {
        Self {
            blocks: Box::new([BlockId::AIR; SECTION_VOLUME]),
            non_air: 0,
        }
    }

    #[inline]
    const fn index(x: u8, y: u8, z: u8) -> usize {
        (y as usize) * SECTION_SIZE * SECTION_SIZE + (z as usize) * SECTION_SIZE + (x as usize)
    }

    #[inline]
    pub fn get(&self, x: u8, y: u8, z: u8) -> BlockId {
        self.blocks[Self::index(x, y, z)]
    }

    /// Write a block, returning the previous one.
    pub fn set(&mut self, x: u8, y: u8, z: u8, block: BlockId) -> BlockId {
        let slot = &mut self.blocks[Self::index(x, y, z)];
        let old = std::mem::replace(slot, block);
        match (old == BlockId::AIR, block == BlockId::AIR) {
            (true, false) => self.non_air += 1,
            (false, true) => self.non_air -= 1,
            _ => {}
        }
        old
    }

    pub fn is_empty(&self) -> bool {
        self.non_air == 0
    }
}

/// A column of chunk sections keyed by section index (y >> 4). Only sections
/// holding at least one non-air block are stored.
#[derive(Clone, Default)]
pub struct Chunk {
    sections: HashMap<i32, ChunkSection>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_block(&self, pos: LocalBlockPos) -> BlockId {
        match self.sections.get(&pos.section_index()) {
            Some(section) => section.get(pos.x, pos.section_local_y(), pos.z),
            None => BlockId::AIR,
        }
    }

    /// Write a block, returning the previous one.
    pub fn set_block(&mut self, pos: LocalBlockPos, block: BlockId) -> BlockId {
        let section_idx = pos.section_index();
        if block == BlockId::AIR {
            let Some(section) = self.sections.get_mut(&section_idx) else {
                return BlockId::AIR;
            };
            let old = section.set(pos.x, pos.section_local_y(), pos.z, block);
            if section.is_empty() {
                self.sections.remove(&section_idx);
            }
            old
        } else {
            self.sections
                .entry(section_idx)
                .or_insert_with(ChunkSection::new_empty)
                .set(pos.x, pos.section_local_y(), pos.z, block)
        }
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_last_block_drops_section() {
        let mut chunk = Chunk::new();
        let pos = LocalBlockPos { x: 3, y: -20, z: 9 };
        assert_eq!(chunk.set_block(pos, BlockId(5)), BlockId::AIR);
        assert_eq!(chunk.section_count(), 1);
        assert_eq!(chunk.set_block(pos, BlockId::AIR), BlockId(5));
        assert_eq!(chunk.section_count(), 0);
    }
}
