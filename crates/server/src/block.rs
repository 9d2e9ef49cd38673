//! Block type definitions and the catalog the starlight engine reads them
//! through.
//!
//! Terrain ids follow the vanilla block state ids. Starlight devices live in
//! a private range above the vanilla palette.

use starlight_engine::network::NodeKind;
use starlight_engine::world::block::{BlockCatalog, BlockId};

pub const AIR: BlockId = BlockId(0);
pub const STONE: BlockId = BlockId(1);
pub const DIRT: BlockId = BlockId(10);
pub const WATER: BlockId = BlockId(80); // level=0
pub const BEDROCK: BlockId = BlockId(85);
pub const OAK_LEAVES: BlockId = BlockId(259);
pub const GLASS: BlockId = BlockId(562);

// -- Starlight devices --

const DEVICE_BASE: u16 = 30_000;

pub const COLLECTOR_CRYSTAL: BlockId = BlockId(DEVICE_BASE);
pub const RELAY_LENS: BlockId = BlockId(DEVICE_BASE + 1);
pub const PRISM_LENS: BlockId = BlockId(DEVICE_BASE + 2);
pub const GATEWAY: BlockId = BlockId(DEVICE_BASE + 3);
pub const ALTAR: BlockId = BlockId(DEVICE_BASE + 4);

/// The block a device of `kind` is placed as.
pub const fn device_block(kind: NodeKind) -> BlockId {
    match kind {
        NodeKind::Collector => COLLECTOR_CRYSTAL,
        NodeKind::Relay => RELAY_LENS,
        NodeKind::Prism => PRISM_LENS,
        NodeKind::Gateway => GATEWAY,
        NodeKind::Consumer => ALTAR,
    }
}

/// The device kind hosted by `id`, if it is a starlight device.
pub fn device_kind(id: BlockId) -> Option<NodeKind> {
    NodeKind::ALL.into_iter().find(|kind| device_block(*kind) == id)
}

/// Can another block be placed in this space?
pub fn is_replaceable(id: BlockId) -> bool {
    id == AIR || id == WATER
}

/// Does light pass through this block?
pub fn is_transparent(id: BlockId) -> bool {
    is_replaceable(id) || id == GLASS || id == OAK_LEAVES || device_kind(id).is_some()
}

/// [`BlockCatalog`] for this server's block palette.
#[derive(Debug, Clone, Copy, Default)]
pub struct StarlightBlocks;

impl BlockCatalog for StarlightBlocks {
    fn is_opaque(&self, id: BlockId) -> bool {
        !is_transparent(id)
    }

    fn node_kind(&self, id: BlockId) -> Option<NodeKind> {
        device_kind(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_its_own_block() {
        for kind in NodeKind::ALL {
            assert_eq!(device_kind(device_block(kind)), Some(kind));
        }
        assert_eq!(device_kind(STONE), None);
    }

    #[test]
    fn devices_and_glass_do_not_block_beams() {
        let catalog = StarlightBlocks;
        assert!(catalog.is_opaque(STONE));
        assert!(catalog.is_opaque(DIRT));
        assert!(!catalog.is_opaque(AIR));
        assert!(!catalog.is_opaque(GLASS));
        assert!(!catalog.is_opaque(RELAY_LENS));
    }
}
