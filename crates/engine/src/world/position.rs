use serde::{Deserialize, Serialize};

/// Identifies one dimension (overworld, nether, a mod dimension...).
///
/// Every network handler, cache record and node id is scoped to exactly one
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DimensionId(pub i32);

impl DimensionId {
    pub const OVERWORLD: DimensionId = DimensionId(0);
    pub const NETHER: DimensionId = DimensionId(-1);
    pub const END: DimensionId = DimensionId(1);
}

impl std::fmt::Display for DimensionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DIM{}", self.0)
    }
}

/// Absolute block position in a dimension.
///
/// Ordered by x, then y, then z. Node ids inherit this ordering, which is
/// what makes path tie-breaking reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl BlockPos {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// The chunk this block belongs to.
    pub const fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: (self.x >> 4) as i32,
            z: (self.z >> 4) as i32,
        }
    }

    /// Position within the chunk (0..16 on x and z, y untouched).
    pub const fn local(&self) -> LocalBlockPos {
        LocalBlockPos {
            x: (self.x & 0xF) as u8,
            y: self.y,
            z: (self.z & 0xF) as u8,
        }
    }

    /// Euclidean distance between block centers.
    pub fn distance(&self, other: &BlockPos) -> f64 {
        let dx = (other.x - self.x) as f64;
        let dy = (other.y - self.y) as f64;
        let dz = (other.z - self.z) as f64;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub const fn offset(&self, dx: i64, dy: i64, dz: i64) -> BlockPos {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

/// Chunk column position (each chunk is 16x16 blocks horizontally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

/// Block position local to a chunk (x, z in 0..16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalBlockPos {
    pub x: u8,
    pub y: i64,
    pub z: u8,
}

impl LocalBlockPos {
    pub const fn section_index(&self) -> i32 {
        (self.y >> 4) as i32
    }

    pub const fn section_local_y(&self) -> u8 {
        (self.y.rem_euclid(16)) as u8
    }

    /// Re-attach a chunk origin to get back an absolute position.
    pub const fn to_world(&self, chunk: ChunkPos) -> BlockPos {
        BlockPos::new(
            ((chunk.x as i64) << 4) + self.x as i64,
            self.y,
            ((chunk.z as i64) << 4) + self.z as i64,
        )
    }
}
