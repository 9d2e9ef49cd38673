//! Full integrity check of a dimension's persisted node set.
//!
//! Normal operation never runs this: it walks every persisted node and asks
//! the world what block actually sits there. Used after manual world edits
//! and by the operator tool.

use super::handler::NetworkHandler;
use super::node::NodeId;
use super::NetworkError;
use crate::world::BlockAccess;
use crate::world::position::{BlockPos, DimensionId};

#[derive(Debug)]
pub struct IntegrityReport {
    pub dimension: DimensionId,
    /// Records examined, quarantined ones included.
    pub checked: usize,
    /// Nodes whose block is gone or is a different device.
    pub stale: usize,
    /// Records that never decoded or failed validation.
    pub corrupt: usize,
    pub issues: Vec<NetworkError>,
}

impl IntegrityReport {
    fn new(dimension: DimensionId) -> Self {
        Self {
            dimension,
            checked: 0,
            stale: 0,
            corrupt: 0,
            issues: Vec::new(),
        }
    }

    pub fn dropped(&self) -> usize {
        self.stale + self.corrupt
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Node ids removed by the check, in the order they were found.
    pub fn dropped_ids(&self) -> Vec<NodeId> {
        self.issues
            .iter()
            .filter_map(|issue| match issue {
                NetworkError::CorruptNode { id, .. } | NetworkError::StaleNode { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }
}

/// Drop every record that no longer matches the world. Per-node findings go
/// to debug logs; callers report the summary.
pub fn check<B: BlockAccess + ?Sized>(handler: &mut NetworkHandler, blocks: &B) -> IntegrityReport {
    let dimension = handler.dimension();
    let mut report = IntegrityReport::new(dimension);

    for quarantined in handler.registry_mut().purge_quarantine() {
        let record = &quarantined.record;
        let id = NodeId::new(dimension, BlockPos::new(record.x, record.y, record.z));
        tracing::debug!("Purging quarantined record {}: {}", id, quarantined.reason);
        report.checked += 1;
        report.corrupt += 1;
        report.issues.push(NetworkError::CorruptNode {
            id,
            reason: quarantined.reason,
        });
    }
    if report.corrupt > 0 {
        // Purged records are not in the graph, but the store changed.
        handler.mark_dirty();
    }

    for id in handler.registry().store().ids() {
        report.checked += 1;
        let Some(node) = handler.registry().get(&id) else {
            continue;
        };
        let issue = match node.validate() {
            Err(reason) => Some(NetworkError::CorruptNode { id, reason }),
            Ok(()) => {
                let found = blocks.node_kind_at(node.position);
                (found != Some(node.kind())).then(|| NetworkError::StaleNode {
                    id,
                    expected: node.kind(),
                    found,
                })
            }
        };
        let Some(issue) = issue else {
            continue;
        };

        tracing::debug!("Integrity: {}", issue);
        match &issue {
            NetworkError::CorruptNode { .. } => report.corrupt += 1,
            _ => report.stale += 1,
        }
        if let Err(err) = handler.remove(id) {
            tracing::warn!("Integrity check could not drop {}: {}", id, err);
            continue;
        }
        report.issues.push(issue);
    }

    report
}
