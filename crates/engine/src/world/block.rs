use crate::network::NodeKind;

/// Opaque block identifier. The engine stores these without interpreting them.
/// Game-specific layers assign meaning through a [`BlockCatalog`].
///
/// The only semantic the engine enforces is that `BlockId::AIR` (0) is the
/// "empty" block: chunk sections filled entirely with AIR are deallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub u16);

impl BlockId {
    /// The universal "empty" block.
    pub const AIR: BlockId = BlockId(0);
}

/// The game's interpretation of block ids, as far as starlight cares.
pub trait BlockCatalog: Sync {
    /// Does this block stop a transmission beam?
    fn is_opaque(&self, id: BlockId) -> bool;

    /// The network device this block hosts, if any.
    fn node_kind(&self, id: BlockId) -> Option<NodeKind>;
}
