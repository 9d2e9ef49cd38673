use std::io;
use std::sync::Arc;

use dashmap::DashMap;

use crate::world::position::DimensionId;

/// Where encoded cache blobs live. Implementations own the I/O; the manager
/// only ever hands them complete, already-encoded records.
pub trait CacheBackend: Send {
    /// Fetch the blob for `(dimension, key)`, or `None` if nothing was saved.
    fn read(&self, dimension: DimensionId, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the blob for `(dimension, key)`.
    fn write(&self, dimension: DimensionId, key: &str, bytes: Vec<u8>) -> io::Result<()>;
}

/// In-memory backend. Clones share storage, so a clone handed to a fresh
/// manager stands in for "the same save directory after a restart".
#[derive(Clone, Default)]
pub struct MemoryBackend {
    blobs: Arc<DashMap<(DimensionId, String), Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, dimension: DimensionId, key: &str) -> bool {
        self.blobs.contains_key(&(dimension, key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Overwrite a blob directly, bypassing any manager.
    pub fn insert_raw(&self, dimension: DimensionId, key: &str, bytes: Vec<u8>) {
        self.blobs.insert((dimension, key.to_string()), bytes);
    }
}

impl CacheBackend for MemoryBackend {
    fn read(&self, dimension: DimensionId, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .get(&(dimension, key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    fn write(&self, dimension: DimensionId, key: &str, bytes: Vec<u8>) -> io::Result<()> {
        self.blobs.insert((dimension, key.to_string()), bytes);
        Ok(())
    }
}
