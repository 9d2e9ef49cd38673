use crate::world::position::{BlockPos, ChunkPos, DimensionId};

/// Stable identity of a network node: the dimension and block it lives in.
///
/// Ordered by dimension, then position. At most one node exists per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub dimension: DimensionId,
    pub pos: BlockPos,
}

impl NodeId {
    pub const fn new(dimension: DimensionId, pos: BlockPos) -> Self {
        Self { dimension, pos }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@({},{},{})", self.dimension, self.pos.x, self.pos.y, self.pos.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    Collector,
    Relay,
    Prism,
    Gateway,
    Consumer,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        NodeKind::Collector,
        NodeKind::Relay,
        NodeKind::Prism,
        NodeKind::Gateway,
        NodeKind::Consumer,
    ];

    /// Can a beam leave a node of this kind towards a node of `target`?
    ///
    /// Collectors only emit, consumers only receive; everything else passes
    /// light on.
    pub const fn can_link_to(self, target: NodeKind) -> bool {
        match (self, target) {
            (NodeKind::Consumer, _) => false,
            (_, NodeKind::Collector) => false,
            _ => true,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            NodeKind::Collector => "collector",
            NodeKind::Relay => "relay",
            NodeKind::Prism => "prism",
            NodeKind::Gateway => "gateway",
            NodeKind::Consumer => "consumer",
        }
    }

    pub fn from_name(name: &str) -> Option<NodeKind> {
        NodeKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// The constellation a collector or prism is attuned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constellation {
    Aevitas,
    Armara,
    Discidia,
    Evorsio,
    Vicio,
}

impl Constellation {
    pub const ALL: [Constellation; 5] = [
        Constellation::Aevitas,
        Constellation::Armara,
        Constellation::Discidia,
        Constellation::Evorsio,
        Constellation::Vicio,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Constellation::Aevitas => "aevitas",
            Constellation::Armara => "armara",
            Constellation::Discidia => "discidia",
            Constellation::Evorsio => "evorsio",
            Constellation::Vicio => "vicio",
        }
    }

    pub fn from_name(name: &str) -> Option<Constellation> {
        Constellation::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// A gateway's linked destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GatewayTarget {
    pub dimension: DimensionId,
    pub pos: BlockPos,
}

/// Kind-specific node attributes. The variant *is* the node's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCapability {
    Collector {
        /// Starlight produced per tick.
        rate: f64,
        attunement: Constellation,
    },
    Relay,
    Prism {
        /// An attuned prism only passes light from matching collectors.
        attunement: Option<Constellation>,
    },
    Gateway {
        name: String,
        destinations: Vec<GatewayTarget>,
    },
    Consumer {
        /// Most starlight accepted per tick.
        demand: f64,
    },
}

impl NodeCapability {
    pub const fn kind(&self) -> NodeKind {
        match self {
            NodeCapability::Collector { .. } => NodeKind::Collector,
            NodeCapability::Relay => NodeKind::Relay,
            NodeCapability::Prism { .. } => NodeKind::Prism,
            NodeCapability::Gateway { .. } => NodeKind::Gateway,
            NodeCapability::Consumer { .. } => NodeKind::Consumer,
        }
    }

    /// Capability a freshly placed device of `kind` starts with.
    pub fn default_for(kind: NodeKind) -> NodeCapability {
        match kind {
            NodeKind::Collector => NodeCapability::Collector {
                rate: 1.0,
                attunement: Constellation::Aevitas,
            },
            NodeKind::Relay => NodeCapability::Relay,
            NodeKind::Prism => NodeCapability::Prism { attunement: None },
            NodeKind::Gateway => NodeCapability::Gateway {
                name: String::new(),
                destinations: Vec::new(),
            },
            NodeKind::Consumer => NodeCapability::Consumer { demand: 1.0 },
        }
    }
}

/// A vertex of the transmission network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkNode {
    pub id: NodeId,
    pub position: BlockPos,
    pub capability: NodeCapability,
}

impl NetworkNode {
    pub fn new(dimension: DimensionId, position: BlockPos, capability: NodeCapability) -> Self {
        Self {
            id: NodeId::new(dimension, position),
            position,
            capability,
        }
    }

    pub const fn kind(&self) -> NodeKind {
        self.capability.kind()
    }

    pub const fn dimension(&self) -> DimensionId {
        self.id.dimension
    }

    pub const fn chunk(&self) -> ChunkPos {
        self.position.chunk()
    }

    /// Structural validation of node data, as applied to persisted records.
    /// Returns the reason the node is unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.pos != self.position {
            return Err(format!(
                "id position ({},{},{}) disagrees with stored position",
                self.id.pos.x, self.id.pos.y, self.id.pos.z
            ));
        }
        match &self.capability {
            NodeCapability::Collector { rate, .. } if !(rate.is_finite() && *rate >= 0.0) => {
                Err(format!("collector rate {rate} is not a non-negative number"))
            }
            NodeCapability::Consumer { demand } if !(demand.is_finite() && *demand >= 0.0) => {
                Err(format!("consumer demand {demand} is not a non-negative number"))
            }
            NodeCapability::Gateway { destinations, .. }
                if destinations
                    .iter()
                    .any(|d| d.dimension == self.id.dimension && d.pos == self.position) =>
            {
                Err("gateway lists itself as a destination".into())
            }
            _ => Ok(()),
        }
    }
}
