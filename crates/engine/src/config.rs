//! Tunable transmission constants.
//!
//! The loss constants are gameplay balance, not architecture: everything in
//! here can be overridden from the host's config file.

use serde::{Deserialize, Serialize};

use crate::network::NodeKind;

/// Range and obstruction tolerance of one node kind.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct KindProfile {
    /// Maximum beam length in blocks.
    pub max_range: f64,
    /// Opaque blocks a beam may pass through before the link is dropped.
    pub obstruction_tolerance: u32,
}

impl KindProfile {
    pub const fn new(max_range: f64, obstruction_tolerance: u32) -> Self {
        Self {
            max_range,
            obstruction_tolerance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KindProfiles {
    pub collector: KindProfile,
    pub relay: KindProfile,
    pub prism: KindProfile,
    pub gateway: KindProfile,
    pub consumer: KindProfile,
}

impl Default for KindProfiles {
    fn default() -> Self {
        Self {
            collector: KindProfile::new(16.0, 0),
            relay: KindProfile::new(16.0, 0),
            prism: KindProfile::new(24.0, 1),
            gateway: KindProfile::new(16.0, 0),
            consumer: KindProfile::new(16.0, 0),
        }
    }
}

impl KindProfiles {
    pub fn get(&self, kind: NodeKind) -> &KindProfile {
        match kind {
            NodeKind::Collector => &self.collector,
            NodeKind::Relay => &self.relay,
            NodeKind::Prism => &self.prism,
            NodeKind::Gateway => &self.gateway,
            NodeKind::Consumer => &self.consumer,
        }
    }

    /// Longest range any kind can reach.
    pub fn max_range(&self) -> f64 {
        NodeKind::ALL
            .iter()
            .map(|kind| self.get(*kind).max_range)
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransmissionConfig {
    /// Loss added per block of beam length.
    pub base_loss_per_block: f64,
    /// Loss added per opaque block a beam passes through.
    pub obstruction_penalty: f64,
    /// Hop cap used when callers don't pass their own.
    pub default_max_hops: usize,
    /// Evaluate link candidates on the rayon pool during rebuilds.
    pub parallel_rebuild: bool,
    /// Operator flag: run a full integrity check when a world loads.
    /// Meant to be switched on for one start after a manual world edit.
    pub integrity_check_on_load: bool,
    pub kinds: KindProfiles,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            base_loss_per_block: 0.02,
            obstruction_penalty: 0.25,
            default_max_hops: 16,
            parallel_rebuild: false,
            integrity_check_on_load: false,
            kinds: KindProfiles::default(),
        }
    }
}

impl TransmissionConfig {
    pub fn profile(&self, kind: NodeKind) -> &KindProfile {
        self.kinds.get(kind)
    }
}
