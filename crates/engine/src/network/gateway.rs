use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::CacheRecord;
use crate::world::position::{BlockPos, DimensionId};

/// Named gateways of a dimension, kept apart from the node set so that
/// destination pickers can list them without loading the whole network.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCache {
    dimension: DimensionId,
    gateways: BTreeMap<BlockPos, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEntry {
    pub pos: BlockPos,
    pub name: String,
}

impl GatewayCache {
    pub fn new(dimension: DimensionId) -> Self {
        Self {
            dimension,
            gateways: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> DimensionId {
        self.dimension
    }

    /// Returns the previous name, if the position was already listed.
    pub fn insert(&mut self, pos: BlockPos, name: String) -> Option<String> {
        self.gateways.insert(pos, name)
    }

    pub fn remove(&mut self, pos: &BlockPos) -> Option<String> {
        self.gateways.remove(pos)
    }

    pub fn contains(&self, pos: &BlockPos) -> bool {
        self.gateways.contains_key(pos)
    }

    pub fn name(&self, pos: &BlockPos) -> Option<&str> {
        self.gateways.get(pos).map(String::as_str)
    }

    /// Keep only the entries `keep` accepts. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&BlockPos, &str) -> bool) -> usize {
        let before = self.gateways.len();
        self.gateways.retain(|pos, name| keep(pos, name));
        before - self.gateways.len()
    }

    /// Entries in position order.
    pub fn entries(&self) -> Vec<GatewayEntry> {
        self.gateways
            .iter()
            .map(|(pos, name)| GatewayEntry {
                pos: *pos,
                name: name.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayCacheSchema {
    #[serde(rename = "Gateways", default)]
    pub gateways: Vec<GatewayEntryRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEntryRecord {
    #[serde(rename = "X")]
    pub x: i64,
    #[serde(rename = "Y")]
    pub y: i64,
    #[serde(rename = "Z")]
    pub z: i64,
    #[serde(rename = "Name")]
    pub name: String,
}

impl CacheRecord for GatewayCache {
    const KEY: &'static str = "starlight_gateways";
    const VERSION: i32 = 1;
    type Schema = GatewayCacheSchema;

    fn empty(dimension: DimensionId) -> Self {
        GatewayCache::new(dimension)
    }

    fn to_schema(&self) -> GatewayCacheSchema {
        GatewayCacheSchema {
            gateways: self
                .gateways
                .iter()
                .map(|(pos, name)| GatewayEntryRecord {
                    x: pos.x,
                    y: pos.y,
                    z: pos.z,
                    name: name.clone(),
                })
                .collect(),
        }
    }

    fn from_schema(dimension: DimensionId, schema: GatewayCacheSchema) -> Self {
        let mut cache = GatewayCache::new(dimension);
        for record in schema.gateways {
            cache.insert(BlockPos::new(record.x, record.y, record.z), record.name);
        }
        cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec;

    #[test]
    fn survives_nbt() {
        let mut cache = GatewayCache::new(DimensionId::END);
        cache.insert(BlockPos::new(0, 70, 0), "spawn".into());
        cache.insert(BlockPos::new(-40, 12, 9), "mine".into());

        let bytes = codec::encode(&cache).unwrap();
        let back: GatewayCache = codec::decode(DimensionId::END, &bytes).unwrap();
        assert_eq!(back, cache);
        assert_eq!(back.entries()[0].name, "mine");
    }

    #[test]
    fn retain_reports_drops() {
        let mut cache = GatewayCache::new(DimensionId::OVERWORLD);
        cache.insert(BlockPos::new(1, 1, 1), "a".into());
        cache.insert(BlockPos::new(2, 2, 2), "b".into());
        assert_eq!(cache.retain(|_, name| name == "a"), 1);
        assert!(cache.contains(&BlockPos::new(1, 1, 1)));
        assert_eq!(cache.len(), 1);
    }
}
