//! The starlight transmission network.
//!
//! Nodes are persisted per dimension in a [`NodeSet`] and become *active*
//! while their chunk column is loaded. Links between active nodes are
//! derived on demand by the [`LinkEngine`] and cached per dimension by a
//! [`NetworkHandler`] until something invalidates them. [`NetworkContext`]
//! ties handlers to the chunk and world lifecycle.

pub mod chunk_index;
pub mod context;
pub mod gateway;
pub mod handler;
pub mod integrity;
pub mod link;
pub mod node;
pub mod path;
pub mod registry;
pub mod store;

pub use context::{ChunkLifecycle, NetworkContext};
pub use gateway::{GatewayCache, GatewayEntry};
pub use handler::NetworkHandler;
pub use integrity::IntegrityReport;
pub use link::{LinkEngine, TransmissionGraph, TransmissionLink};
pub use node::{Constellation, GatewayTarget, NetworkNode, NodeCapability, NodeId, NodeKind};
pub use path::{Path, QueryResult};
pub use registry::NodeRegistry;
pub use store::NodeSet;

use crate::cache::CacheError;
use crate::world::position::{BlockPos, ChunkPos, DimensionId};

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("a node already exists at {id}")]
    DuplicateNode { id: NodeId },
    #[error("no node at {id}")]
    UnknownNode { id: NodeId },
    #[error("node {id} is corrupt: {reason}")]
    CorruptNode { id: NodeId, reason: String },
    #[error("node {id} expects a {expected:?} block, found {found:?}")]
    StaleNode {
        id: NodeId,
        expected: NodeKind,
        found: Option<NodeKind>,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// What changed in a dimension's network.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkChange {
    NodeCreated(NodeId),
    NodeRemoved(NodeId),
    ChunkActivated { chunk: ChunkPos, nodes: usize },
    ChunkDeactivated { chunk: ChunkPos, nodes: usize },
    /// A block changed near active nodes; links will be rebuilt.
    LinksInvalidated(BlockPos),
    IntegrityPruned { dropped: usize },
    WorldUnloaded,
}

/// Receives network changes synchronously, on the thread that made them.
pub trait NetworkObserver: Send {
    fn network_changed(&self, dimension: DimensionId, change: &NetworkChange);
}
