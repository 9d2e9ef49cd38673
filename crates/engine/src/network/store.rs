//! The persisted node set of one dimension and its on-disk schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::node::{Constellation, GatewayTarget, NetworkNode, NodeCapability, NodeId, NodeKind};
use super::NetworkError;
use crate::cache::{codec, CacheError, CacheRecord};
use crate::world::position::{BlockPos, DimensionId};

/// Every node a dimension knows about, loaded or not.
///
/// Records that failed to decode or validate are kept verbatim in
/// `quarantined` so they survive a save untouched until an integrity check
/// decides their fate. They never take part in the network.
#[derive(Debug, PartialEq)]
pub struct NodeSet {
    dimension: DimensionId,
    nodes: BTreeMap<NodeId, NetworkNode>,
    quarantined: Vec<QuarantinedRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuarantinedRecord {
    pub record: NodeRecord,
    pub reason: String,
}

impl NodeSet {
    pub fn new(dimension: DimensionId) -> Self {
        Self {
            dimension,
            nodes: BTreeMap::new(),
            quarantined: Vec::new(),
        }
    }

    pub fn dimension(&self) -> DimensionId {
        self.dimension
    }

    pub fn get(&self, id: &NodeId) -> Option<&NetworkNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn insert(&mut self, node: NetworkNode) -> Result<(), NetworkError> {
        if self.nodes.contains_key(&node.id) {
            return Err(NetworkError::DuplicateNode { id: node.id });
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<NetworkNode> {
        self.nodes.remove(id)
    }

    /// Nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn quarantined(&self) -> &[QuarantinedRecord] {
        &self.quarantined
    }

    pub fn take_quarantined(&mut self) -> Vec<QuarantinedRecord> {
        std::mem::take(&mut self.quarantined)
    }

    fn admit(&mut self, record: NodeRecord) {
        let node = match record.to_node(self.dimension) {
            Ok(node) => node,
            Err(reason) => {
                tracing::warn!("Quarantining node record in {}: {}", self.dimension, reason);
                self.quarantined.push(QuarantinedRecord { record, reason });
                return;
            }
        };
        if let Err(reason) = node.validate() {
            tracing::warn!("Quarantining node {}: {}", node.id, reason);
            self.quarantined.push(QuarantinedRecord { record, reason });
            return;
        }
        if self.nodes.contains_key(&node.id) {
            tracing::warn!("Duplicate node record for {}, keeping the first", node.id);
            self.quarantined.push(QuarantinedRecord {
                record,
                reason: "duplicate position".into(),
            });
            return;
        }
        self.nodes.insert(node.id, node);
    }
}

// ── On-disk schema (v2) ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSetSchema {
    #[serde(rename = "Nodes")]
    pub nodes: Vec<NodeRecord>,
    #[serde(rename = "Quarantine", default)]
    pub quarantine: Vec<QuarantineRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    #[serde(rename = "Node")]
    pub node: NodeRecord,
    #[serde(rename = "Reason")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "X")]
    pub x: i64,
    #[serde(rename = "Y")]
    pub y: i64,
    #[serde(rename = "Z")]
    pub z: i64,
    #[serde(rename = "Kind")]
    pub kind: String,
    #[serde(rename = "Collector", default, skip_serializing_if = "Option::is_none")]
    pub collector: Option<CollectorRecord>,
    #[serde(rename = "Prism", default, skip_serializing_if = "Option::is_none")]
    pub prism: Option<PrismRecord>,
    #[serde(rename = "Gateway", default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayRecord>,
    #[serde(rename = "Consumer", default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ConsumerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorRecord {
    #[serde(rename = "Rate")]
    pub rate: f64,
    #[serde(rename = "Attunement")]
    pub attunement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrismRecord {
    #[serde(rename = "Attunement", default, skip_serializing_if = "Option::is_none")]
    pub attunement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Destinations", default)]
    pub destinations: Vec<TargetRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    #[serde(rename = "Dimension")]
    pub dimension: i32,
    #[serde(rename = "X")]
    pub x: i64,
    #[serde(rename = "Y")]
    pub y: i64,
    #[serde(rename = "Z")]
    pub z: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerRecord {
    #[serde(rename = "Demand")]
    pub demand: f64,
}

impl NodeRecord {
    fn bare(pos: BlockPos, kind: NodeKind) -> Self {
        Self {
            x: pos.x,
            y: pos.y,
            z: pos.z,
            kind: kind.name().to_string(),
            collector: None,
            prism: None,
            gateway: None,
            consumer: None,
        }
    }

    pub fn from_node(node: &NetworkNode) -> Self {
        let mut record = Self::bare(node.position, node.kind());
        match &node.capability {
            NodeCapability::Collector { rate, attunement } => {
                record.collector = Some(CollectorRecord {
                    rate: *rate,
                    attunement: attunement.name().to_string(),
                });
            }
            NodeCapability::Relay => {}
            NodeCapability::Prism { attunement } => {
                record.prism = Some(PrismRecord {
                    attunement: attunement.map(|c| c.name().to_string()),
                });
            }
            NodeCapability::Gateway { name, destinations } => {
                record.gateway = Some(GatewayRecord {
                    name: name.clone(),
                    destinations: destinations
                        .iter()
                        .map(|t| TargetRecord {
                            dimension: t.dimension.0,
                            x: t.pos.x,
                            y: t.pos.y,
                            z: t.pos.z,
                        })
                        .collect(),
                });
            }
            NodeCapability::Consumer { demand } => {
                record.consumer = Some(ConsumerRecord { demand: *demand });
            }
        }
        record
    }

    /// Rebuild the node, or explain why the record is unusable.
    pub fn to_node(&self, dimension: DimensionId) -> Result<NetworkNode, String> {
        let pos = BlockPos::new(self.x, self.y, self.z);
        let kind = NodeKind::from_name(&self.kind)
            .ok_or_else(|| format!("unknown node kind {:?}", self.kind))?;
        let missing = |section: &str| format!("{} record without {} data", self.kind, section);
        let capability = match kind {
            NodeKind::Collector => {
                let data = self.collector.as_ref().ok_or_else(|| missing("Collector"))?;
                NodeCapability::Collector {
                    rate: data.rate,
                    attunement: parse_constellation(&data.attunement)?,
                }
            }
            NodeKind::Relay => NodeCapability::Relay,
            NodeKind::Prism => {
                let attunement = match self.prism.as_ref().and_then(|p| p.attunement.as_deref()) {
                    Some(name) => Some(parse_constellation(name)?),
                    None => None,
                };
                NodeCapability::Prism { attunement }
            }
            NodeKind::Gateway => {
                let data = self.gateway.as_ref().ok_or_else(|| missing("Gateway"))?;
                NodeCapability::Gateway {
                    name: data.name.clone(),
                    destinations: data
                        .destinations
                        .iter()
                        .map(|t| GatewayTarget {
                            dimension: DimensionId(t.dimension),
                            pos: BlockPos::new(t.x, t.y, t.z),
                        })
                        .collect(),
                }
            }
            NodeKind::Consumer => {
                let data = self.consumer.as_ref().ok_or_else(|| missing("Consumer"))?;
                NodeCapability::Consumer { demand: data.demand }
            }
        };
        Ok(NetworkNode::new(dimension, pos, capability))
    }
}

fn parse_constellation(name: &str) -> Result<Constellation, String> {
    Constellation::from_name(name).ok_or_else(|| format!("unknown constellation {name:?}"))
}

// ── Schema v1 ────────────────────────────────────────────────────────────
//
// v1 kept every attribute flat on the node compound and had no gateway
// destination lists.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSetSchemaV1 {
    #[serde(rename = "Nodes")]
    pub nodes: Vec<NodeRecordV1>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecordV1 {
    #[serde(rename = "X")]
    pub x: i64,
    #[serde(rename = "Y")]
    pub y: i64,
    #[serde(rename = "Z")]
    pub z: i64,
    #[serde(rename = "Kind")]
    pub kind: String,
    #[serde(rename = "Rate", default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(rename = "Attunement", default, skip_serializing_if = "Option::is_none")]
    pub attunement: Option<String>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Demand", default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<f64>,
}

impl From<NodeRecordV1> for NodeRecord {
    fn from(old: NodeRecordV1) -> Self {
        let mut record = NodeRecord {
            x: old.x,
            y: old.y,
            z: old.z,
            kind: old.kind,
            collector: None,
            prism: None,
            gateway: None,
            consumer: None,
        };
        match NodeKind::from_name(&record.kind) {
            Some(NodeKind::Collector) => {
                record.collector = Some(CollectorRecord {
                    rate: old.rate.unwrap_or(1.0),
                    attunement: old
                        .attunement
                        .unwrap_or_else(|| Constellation::Aevitas.name().to_string()),
                });
            }
            Some(NodeKind::Prism) => {
                record.prism = Some(PrismRecord {
                    attunement: old.attunement,
                });
            }
            Some(NodeKind::Gateway) => {
                record.gateway = Some(GatewayRecord {
                    name: old.name.unwrap_or_default(),
                    destinations: Vec::new(),
                });
            }
            Some(NodeKind::Consumer) => {
                record.consumer = Some(ConsumerRecord {
                    demand: old.demand.unwrap_or(1.0),
                });
            }
            Some(NodeKind::Relay) | None => {}
        }
        record
    }
}

impl CacheRecord for NodeSet {
    const KEY: &'static str = "starlight_nodes";
    const VERSION: i32 = 2;
    type Schema = NodeSetSchema;

    fn empty(dimension: DimensionId) -> Self {
        NodeSet::new(dimension)
    }

    fn to_schema(&self) -> NodeSetSchema {
        NodeSetSchema {
            nodes: self.nodes.values().map(NodeRecord::from_node).collect(),
            quarantine: self
                .quarantined
                .iter()
                .map(|q| QuarantineRecord {
                    node: q.record.clone(),
                    reason: q.reason.clone(),
                })
                .collect(),
        }
    }

    fn from_schema(dimension: DimensionId, schema: NodeSetSchema) -> Self {
        let mut set = NodeSet::new(dimension);
        for record in schema.nodes {
            set.admit(record);
        }
        set.quarantined
            .extend(schema.quarantine.into_iter().map(|q| QuarantinedRecord {
                record: q.node,
                reason: q.reason,
            }));
        set
    }

    fn migrate(dimension: DimensionId, found: i32, bytes: &[u8]) -> Result<Self, CacheError> {
        match found {
            1 => {
                let old: NodeSetSchemaV1 = codec::decode_payload(Self::KEY, bytes)?;
                let schema = NodeSetSchema {
                    nodes: old.nodes.into_iter().map(NodeRecord::from).collect(),
                    quarantine: Vec::new(),
                };
                Ok(Self::from_schema(dimension, schema))
            }
            _ => Err(CacheError::UnsupportedVersion {
                key: Self::KEY,
                found,
                supported: Self::VERSION,
            }),
        }
    }
}
