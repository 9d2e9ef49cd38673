//! Per-dimension, per-key persistent records.
//!
//! A record is loaded from the backend the first time anyone asks for it in a
//! dimension, stays resident until that dimension unloads, and is written
//! back on save or unload when marked dirty.
//!
//! Records are reached in one of two ways:
//!
//! - **Borrow** ([`WorldCacheManager::get_or_load`]): the record stays in the
//!   manager and callers get a `&mut` for the duration of one call.
//! - **Checkout** ([`WorldCacheManager::checkout`]): ownership moves to a
//!   long-lived owner (a network handler) and comes back with
//!   [`WorldCacheManager::checkin`] before the dimension unloads. While a
//!   record is checked out the manager refuses to hand out a second copy.
//!
//! Either way there is exactly one in-memory instance per (dimension, key).

pub mod backend;
pub mod codec;

use std::any::Any;
use std::io;

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::{CacheBackend, MemoryBackend};

use crate::world::position::DimensionId;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O for {key} in {dimension}")]
    Io {
        dimension: DimensionId,
        key: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("encoding {key}")]
    Encode {
        key: &'static str,
        #[source]
        source: fastnbt::error::Error,
    },
    #[error("decoding {key}")]
    Decode {
        key: &'static str,
        #[source]
        source: fastnbt::error::Error,
    },
    #[error("{key}: found schema v{found}, this build supports up to v{supported}")]
    UnsupportedVersion {
        key: &'static str,
        found: i32,
        supported: i32,
    },
    #[error("expected record {expected}, file holds {found}")]
    KeyMismatch { expected: &'static str, found: String },
    #[error("{key} in {dimension} is checked out")]
    CheckedOut {
        dimension: DimensionId,
        key: &'static str,
    },
    #[error("{key} in {dimension} was not checked out")]
    NotCheckedOut {
        dimension: DimensionId,
        key: &'static str,
    },
    #[error("record key {key} is used by two different types")]
    TypeConflict { key: &'static str },
}

/// A persistable, dimension-scoped record with a versioned on-disk schema.
///
/// `Schema` is the explicit field list written to disk. The in-memory type
/// is free to index or validate however it likes on the way in.
pub trait CacheRecord: Sized + Send + 'static {
    /// File/slot name, unique across record types.
    const KEY: &'static str;
    /// Schema version written by this build.
    const VERSION: i32;

    type Schema: Serialize + DeserializeOwned;

    /// The record for a dimension that has never saved one.
    fn empty(dimension: DimensionId) -> Self;

    fn to_schema(&self) -> Self::Schema;

    fn from_schema(dimension: DimensionId, schema: Self::Schema) -> Self;

    /// Upgrade a blob written at an older `found` version. The whole encoded
    /// envelope is passed in; use [`codec::decode_payload`] with the legacy
    /// schema type.
    fn migrate(dimension: DimensionId, found: i32, bytes: &[u8]) -> Result<Self, CacheError> {
        let _ = (dimension, bytes);
        Err(CacheError::UnsupportedVersion {
            key: Self::KEY,
            found,
            supported: Self::VERSION,
        })
    }
}

trait ErasedRecord: Send {
    fn encode(&self) -> Result<Vec<u8>, CacheError>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: CacheRecord> ErasedRecord for T {
    fn encode(&self) -> Result<Vec<u8>, CacheError> {
        codec::encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

enum SlotState {
    Resident(Box<dyn ErasedRecord>),
    CheckedOut,
}

struct Slot {
    state: SlotState,
    dirty: bool,
}

type SlotKey = (DimensionId, &'static str);

pub struct WorldCacheManager {
    backend: Box<dyn CacheBackend>,
    /// Insertion-ordered so saves write files in a stable order.
    slots: IndexMap<SlotKey, Slot>,
}

impl WorldCacheManager {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self {
            backend,
            slots: IndexMap::new(),
        }
    }

    /// Borrow a record, loading it on first access.
    pub fn get_or_load<T: CacheRecord>(&mut self, dimension: DimensionId) -> Result<&mut T, CacheError> {
        self.ensure_loaded::<T>(dimension)?;
        let Some(slot) = self.slots.get_mut(&(dimension, T::KEY)) else {
            unreachable!("slot inserted by ensure_loaded");
        };
        match &mut slot.state {
            SlotState::Resident(record) => record
                .as_any_mut()
                .downcast_mut::<T>()
                .ok_or(CacheError::TypeConflict { key: T::KEY }),
            SlotState::CheckedOut => Err(CacheError::CheckedOut {
                dimension,
                key: T::KEY,
            }),
        }
    }

    /// Flag a resident or checked-out record for the next save.
    pub fn mark_dirty<T: CacheRecord>(&mut self, dimension: DimensionId) {
        if let Some(slot) = self.slots.get_mut(&(dimension, T::KEY)) {
            slot.dirty = true;
        }
    }

    /// Move a record out of the manager.
    pub fn checkout<T: CacheRecord>(&mut self, dimension: DimensionId) -> Result<T, CacheError> {
        self.ensure_loaded::<T>(dimension)?;
        let Some(slot) = self.slots.get_mut(&(dimension, T::KEY)) else {
            unreachable!("slot inserted by ensure_loaded");
        };
        match &slot.state {
            SlotState::CheckedOut => {
                return Err(CacheError::CheckedOut {
                    dimension,
                    key: T::KEY,
                });
            }
            SlotState::Resident(record) if !record.as_any().is::<T>() => {
                return Err(CacheError::TypeConflict { key: T::KEY });
            }
            SlotState::Resident(_) => {}
        }
        match std::mem::replace(&mut slot.state, SlotState::CheckedOut) {
            SlotState::Resident(record) => match record.into_any().downcast::<T>() {
                Ok(record) => Ok(*record),
                Err(_) => unreachable!("type checked above"),
            },
            SlotState::CheckedOut => unreachable!("state checked above"),
        }
    }

    /// Return a checked-out record. `dirty` says whether the owner changed it.
    pub fn checkin<T: CacheRecord>(
        &mut self,
        dimension: DimensionId,
        record: T,
        dirty: bool,
    ) -> Result<(), CacheError> {
        match self.slots.get_mut(&(dimension, T::KEY)) {
            Some(slot) if matches!(slot.state, SlotState::CheckedOut) => {
                slot.state = SlotState::Resident(Box::new(record));
                slot.dirty |= dirty;
                Ok(())
            }
            _ => Err(CacheError::NotCheckedOut {
                dimension,
                key: T::KEY,
            }),
        }
    }

    /// Write a record straight to the backend without taking it back.
    /// Used to save checked-out records while their owner keeps running.
    pub fn persist<T: CacheRecord>(&mut self, dimension: DimensionId, record: &T) -> Result<(), CacheError> {
        let bytes = codec::encode(record)?;
        self.write(dimension, T::KEY, bytes)?;
        if let Some(slot) = self.slots.get_mut(&(dimension, T::KEY)) {
            slot.dirty = false;
        }
        Ok(())
    }

    /// Write every dirty resident record of `dimension`. Returns how many
    /// were written.
    pub fn save(&mut self, dimension: DimensionId) -> Result<usize, CacheError> {
        let mut pending = Vec::new();
        for (&(dim, key), slot) in &self.slots {
            if dim != dimension || !slot.dirty {
                continue;
            }
            if let SlotState::Resident(record) = &slot.state {
                pending.push((key, record.encode()?));
            }
        }

        let written = pending.len();
        for (key, bytes) in pending {
            self.write(dimension, key, bytes)?;
            if let Some(slot) = self.slots.get_mut(&(dimension, key)) {
                slot.dirty = false;
            }
        }
        Ok(written)
    }

    pub fn save_all(&mut self) -> Result<usize, CacheError> {
        let mut total = 0;
        for dimension in self.dimensions() {
            total += self.save(dimension)?;
        }
        Ok(total)
    }

    /// Save and drop every record of `dimension`. Anything still checked
    /// out is dropped from bookkeeping too; its owner must persist it first.
    pub fn unload(&mut self, dimension: DimensionId) -> Result<usize, CacheError> {
        let written = self.save(dimension)?;
        self.slots.retain(|&(dim, key), slot| {
            if dim != dimension {
                return true;
            }
            if matches!(slot.state, SlotState::CheckedOut) {
                tracing::warn!("Unloading {} in {} while it is still checked out", key, dim);
            }
            false
        });
        Ok(written)
    }

    pub fn is_resident(&self, dimension: DimensionId, key: &str) -> bool {
        self.slots
            .iter()
            .any(|(&(dim, k), slot)| dim == dimension && k == key && matches!(slot.state, SlotState::Resident(_)))
    }

    /// Dimensions with at least one slot, in first-access order.
    pub fn dimensions(&self) -> Vec<DimensionId> {
        let mut out: Vec<DimensionId> = Vec::new();
        for &(dim, _) in self.slots.keys() {
            if !out.contains(&dim) {
                out.push(dim);
            }
        }
        out
    }

    fn ensure_loaded<T: CacheRecord>(&mut self, dimension: DimensionId) -> Result<(), CacheError> {
        if self.slots.contains_key(&(dimension, T::KEY)) {
            return Ok(());
        }
        let bytes = self
            .backend
            .read(dimension, T::KEY)
            .map_err(|source| CacheError::Io {
                dimension,
                key: T::KEY,
                source,
            })?;
        let record = match bytes {
            Some(bytes) => {
                let record = codec::decode::<T>(dimension, &bytes)?;
                tracing::debug!("Loaded {} for {} ({} bytes)", T::KEY, dimension, bytes.len());
                record
            }
            None => T::empty(dimension),
        };
        self.slots.insert(
            (dimension, T::KEY),
            Slot {
                state: SlotState::Resident(Box::new(record)),
                dirty: false,
            },
        );
        Ok(())
    }

    fn write(&self, dimension: DimensionId, key: &'static str, bytes: Vec<u8>) -> Result<(), CacheError> {
        self.backend
            .write(dimension, key, bytes)
            .map_err(|source| CacheError::Io {
                dimension,
                key,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq)]
    struct Counter {
        dimension: DimensionId,
        hits: i64,
    }

    #[derive(Serialize, Deserialize)]
    struct CounterSchema {
        #[serde(rename = "Hits")]
        hits: i64,
    }

    #[derive(Serialize, Deserialize)]
    struct CounterSchemaV1 {
        #[serde(rename = "Count")]
        count: i32,
    }

    impl CacheRecord for Counter {
        const KEY: &'static str = "test_counter";
        const VERSION: i32 = 2;
        type Schema = CounterSchema;

        fn empty(dimension: DimensionId) -> Self {
            Counter { dimension, hits: 0 }
        }

        fn to_schema(&self) -> CounterSchema {
            CounterSchema { hits: self.hits }
        }

        fn from_schema(dimension: DimensionId, schema: CounterSchema) -> Self {
            Counter {
                dimension,
                hits: schema.hits,
            }
        }

        fn migrate(dimension: DimensionId, found: i32, bytes: &[u8]) -> Result<Self, CacheError> {
            assert_eq!(found, 1);
            let old: CounterSchemaV1 = codec::decode_payload(Self::KEY, bytes)?;
            Ok(Counter {
                dimension,
                hits: old.count as i64,
            })
        }
    }

    const DIM: DimensionId = DimensionId::OVERWORLD;

    #[test]
    fn lazy_load_then_save_only_when_dirty() {
        let backend = MemoryBackend::new();
        let mut caches = WorldCacheManager::new(Box::new(backend.clone()));

        assert_eq!(caches.get_or_load::<Counter>(DIM).unwrap().hits, 0);
        assert!(caches.is_resident(DIM, Counter::KEY));
        assert_eq!(caches.save(DIM).unwrap(), 0);
        assert!(backend.is_empty());

        caches.get_or_load::<Counter>(DIM).unwrap().hits = 7;
        caches.mark_dirty::<Counter>(DIM);
        assert_eq!(caches.save(DIM).unwrap(), 1);
        assert_eq!(caches.save(DIM).unwrap(), 0);

        let mut reopened = WorldCacheManager::new(Box::new(backend));
        assert_eq!(reopened.get_or_load::<Counter>(DIM).unwrap().hits, 7);
    }

    #[test]
    fn unload_flushes_and_forgets() {
        let backend = MemoryBackend::new();
        let mut caches = WorldCacheManager::new(Box::new(backend.clone()));
        caches.get_or_load::<Counter>(DIM).unwrap().hits = 3;
        caches.mark_dirty::<Counter>(DIM);
        caches.get_or_load::<Counter>(DimensionId::NETHER).unwrap();

        assert_eq!(caches.unload(DIM).unwrap(), 1);
        assert!(!caches.is_resident(DIM, Counter::KEY));
        assert_eq!(caches.dimensions(), vec![DimensionId::NETHER]);

        assert_eq!(caches.get_or_load::<Counter>(DIM).unwrap().hits, 3);
    }

    #[test]
    fn checkout_excludes_second_copy() {
        let mut caches = WorldCacheManager::new(Box::new(MemoryBackend::new()));
        let mut counter = caches.checkout::<Counter>(DIM).unwrap();
        assert!(matches!(
            caches.get_or_load::<Counter>(DIM),
            Err(CacheError::CheckedOut { .. })
        ));
        assert!(matches!(
            caches.checkout::<Counter>(DIM),
            Err(CacheError::CheckedOut { .. })
        ));

        counter.hits = 11;
        caches.checkin(DIM, counter, true).unwrap();
        assert_eq!(caches.get_or_load::<Counter>(DIM).unwrap().hits, 11);
        assert_eq!(caches.save(DIM).unwrap(), 1);

        let stray = Counter::empty(DIM);
        assert!(matches!(
            caches.checkin(DIM, stray, false),
            Err(CacheError::NotCheckedOut { .. })
        ));
    }

    #[test]
    fn persist_writes_checked_out_record() {
        let backend = MemoryBackend::new();
        let mut caches = WorldCacheManager::new(Box::new(backend.clone()));
        let mut counter = caches.checkout::<Counter>(DIM).unwrap();
        counter.hits = 5;
        caches.persist(DIM, &counter).unwrap();
        assert!(backend.contains(DIM, Counter::KEY));

        let mut other = WorldCacheManager::new(Box::new(backend));
        assert_eq!(other.get_or_load::<Counter>(DIM).unwrap().hits, 5);
    }

    #[test]
    fn older_schema_is_migrated() {
        let backend = MemoryBackend::new();
        let bytes = codec::encode_versioned(Counter::KEY, 1, &CounterSchemaV1 { count: 42 }).unwrap();
        backend.insert_raw(DIM, Counter::KEY, bytes);

        let mut caches = WorldCacheManager::new(Box::new(backend));
        assert_eq!(caches.get_or_load::<Counter>(DIM).unwrap().hits, 42);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let backend = MemoryBackend::new();
        let bytes = codec::encode_versioned(Counter::KEY, 9, &CounterSchema { hits: 1 }).unwrap();
        backend.insert_raw(DIM, Counter::KEY, bytes);

        let mut caches = WorldCacheManager::new(Box::new(backend));
        assert!(matches!(
            caches.get_or_load::<Counter>(DIM),
            Err(CacheError::UnsupportedVersion { found: 9, supported: 2, .. })
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let backend = MemoryBackend::new();
        let bytes = codec::encode_versioned("something_else", 2, &CounterSchema { hits: 1 }).unwrap();
        backend.insert_raw(DIM, Counter::KEY, bytes);

        let mut caches = WorldCacheManager::new(Box::new(backend));
        assert!(matches!(
            caches.get_or_load::<Counter>(DIM),
            Err(CacheError::KeyMismatch { .. })
        ));
    }
}
