//! Network-change event bus.
//!
//! The engine reports changes synchronously through [`NetworkObserver`].
//! [`ChangeCollector`] buffers them while one host operation runs, and the
//! host then publishes everything that operation caused as
//! [`NetworkChangeBatch`]es on a shared `tokio::sync::broadcast` channel, one
//! per affected dimension. Devices and caches that hold derived state
//! subscribe and drop it when a batch arrives.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use starlight_engine::network::{NetworkChange, NetworkObserver};
use starlight_engine::world::position::DimensionId;

/// Recommended capacity for the broadcast channel.
pub const BUS_CAPACITY: usize = 256;

/// Everything one host operation changed in one dimension.
///
/// Uses `Arc<[...]>` so cloning per broadcast subscriber is just a refcount bump.
#[derive(Clone, Debug)]
pub struct NetworkChangeBatch {
    pub dimension: DimensionId,
    pub changes: Arc<[NetworkChange]>,
}

/// Observer that records changes until the host drains them.
#[derive(Clone, Default)]
pub struct ChangeCollector {
    buffer: Arc<Mutex<Vec<(DimensionId, NetworkChange)>>>,
}

impl ChangeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the buffered changes, grouped into per-dimension batches in the
    /// order each dimension first changed.
    pub fn take_batches(&self) -> Vec<NetworkChangeBatch> {
        let drained = match self.buffer.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        let mut grouped: Vec<(DimensionId, Vec<NetworkChange>)> = Vec::new();
        for (dimension, change) in drained {
            match grouped.iter_mut().find(|(d, _)| *d == dimension) {
                Some((_, changes)) => changes.push(change),
                None => grouped.push((dimension, vec![change])),
            }
        }
        grouped
            .into_iter()
            .map(|(dimension, changes)| NetworkChangeBatch {
                dimension,
                changes: changes.into(),
            })
            .collect()
    }

    /// Drain and send. Returns how many batches went out; zero subscribers is fine.
    pub fn publish(&self, bus: &broadcast::Sender<NetworkChangeBatch>) -> usize {
        let batches = self.take_batches();
        let count = batches.len();
        for batch in batches {
            let _ = bus.send(batch);
        }
        count
    }
}

impl NetworkObserver for ChangeCollector {
    fn network_changed(&self, dimension: DimensionId, change: &NetworkChange) {
        match self.buffer.lock() {
            Ok(mut buffer) => buffer.push((dimension, change.clone())),
            Err(poisoned) => poisoned.into_inner().push((dimension, change.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starlight_engine::network::NodeId;
    use starlight_engine::world::position::BlockPos;

    #[test]
    fn changes_are_batched_per_dimension() {
        let collector = ChangeCollector::new();
        let a = NodeId::new(DimensionId::OVERWORLD, BlockPos::new(0, 0, 0));
        let b = NodeId::new(DimensionId::END, BlockPos::new(0, 0, 0));
        collector.network_changed(DimensionId::OVERWORLD, &NetworkChange::NodeCreated(a));
        collector.network_changed(DimensionId::END, &NetworkChange::NodeCreated(b));
        collector.network_changed(DimensionId::OVERWORLD, &NetworkChange::NodeRemoved(a));

        let batches = collector.take_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].dimension, DimensionId::OVERWORLD);
        assert_eq!(
            &*batches[0].changes,
            &[NetworkChange::NodeCreated(a), NetworkChange::NodeRemoved(a)]
        );
        assert!(collector.take_batches().is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let (tx, mut rx) = broadcast::channel(BUS_CAPACITY);
        let collector = ChangeCollector::new();
        collector.network_changed(DimensionId::NETHER, &NetworkChange::WorldUnloaded);
        assert_eq!(collector.publish(&tx), 1);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.dimension, DimensionId::NETHER);
        assert_eq!(&*batch.changes, &[NetworkChange::WorldUnloaded]);
    }
}
