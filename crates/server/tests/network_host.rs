//! End-to-end tests for the host: devices placed through the block layer,
//! caches written to disk and read back by a fresh host.

use std::path::PathBuf;

use starlight_engine::TransmissionConfig;
use starlight_engine::network::{Constellation, NetworkChange, NodeCapability, NodeId, NodeKind};
use starlight_engine::world::position::{BlockPos, ChunkPos, DimensionId};
use starlight_server::block;
use starlight_server::host::StarlightHost;
use starlight_server::persistence::{FileBackend, QueuedFileBackend};

const DIM: DimensionId = DimensionId::OVERWORLD;
const ORIGIN: ChunkPos = ChunkPos::new(0, 0);

fn temp_world(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn collector() -> NodeCapability {
    NodeCapability::Collector {
        rate: 1.0,
        attunement: Constellation::Discidia,
    }
}

/// Collector and consumer 14 blocks apart, with a relay off to the side
/// that only makes the route longer.
fn build_line(host: &mut StarlightHost) -> (NodeId, NodeId) {
    host.load_world(DIM);
    host.load_chunk(DIM, ORIGIN);
    let source = host.place_device(DIM, BlockPos::new(2, 64, 1), collector()).unwrap();
    host.place_device(DIM, BlockPos::new(5, 64, 8), NodeCapability::Relay).unwrap();
    let sink = host
        .place_device(DIM, BlockPos::new(2, 64, 15), NodeCapability::Consumer { demand: 2.0 })
        .unwrap();
    (source, sink)
}

#[test]
fn network_survives_a_restart() {
    let dir = temp_world("starlight_host_restart");

    let first_path = {
        let mut host = StarlightHost::new(TransmissionConfig::default(), Box::new(FileBackend::new(&dir)));
        let (source, _) = build_line(&mut host);
        let path = host.query(source, NodeKind::Consumer, None).into_path().unwrap();
        assert_eq!(path.hops(), 1, "collector reaches the consumer directly within 16 blocks");
        host.unload_world(DIM);
        path
    };
    assert!(FileBackend::new(&dir).path_for(DIM, "starlight_nodes").exists());

    let mut host = StarlightHost::new(TransmissionConfig::default(), Box::new(FileBackend::new(&dir)));
    host.load_world(DIM);
    assert_eq!(host.node_count(DIM), 3);

    let source = first_path.source();
    assert!(!host.query(source, NodeKind::Consumer, None).is_found(), "chunk not loaded yet");

    host.load_chunk(DIM, ORIGIN);
    let again = host.query(source, NodeKind::Consumer, None).into_path().unwrap();
    assert_eq!(again, first_path);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn queued_writes_are_visible_before_they_land() {
    let dir = temp_world("starlight_host_queued");
    let queue = QueuedFileBackend::spawn(FileBackend::new(&dir));

    {
        let mut host = StarlightHost::new(TransmissionConfig::default(), Box::new(queue.clone()));
        build_line(&mut host);
        assert!(host.save_all().unwrap() >= 1);
        host.unload_world(DIM);
    }

    // Same queue, so a read may be answered from the pending map.
    let mut host = StarlightHost::new(TransmissionConfig::default(), Box::new(queue.clone()));
    host.load_world(DIM);
    assert_eq!(host.node_count(DIM), 3);

    queue.drain().await.unwrap();
    assert_eq!(queue.pending_count(), 0);
    assert!(queue.files().path_for(DIM, "starlight_nodes").exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn every_operation_publishes_its_changes() {
    let mut host = StarlightHost::new(
        TransmissionConfig::default(),
        Box::new(starlight_engine::cache::MemoryBackend::new()),
    );
    let mut rx = host.subscribe();
    host.load_world(DIM);
    host.load_chunk(DIM, ORIGIN);

    let id = host
        .place_device(DIM, BlockPos::new(4, 64, 4), NodeCapability::Relay)
        .unwrap();
    let batch = rx.try_recv().unwrap();
    assert_eq!(batch.dimension, DIM);
    assert_eq!(&*batch.changes, &[NetworkChange::NodeCreated(id)]);

    host.unload_chunk(DIM, ORIGIN);
    let batch = rx.try_recv().unwrap();
    assert_eq!(
        &*batch.changes,
        &[NetworkChange::ChunkDeactivated {
            chunk: ORIGIN,
            nodes: 1
        }]
    );

    // Nothing active is left, so a block change has nothing to invalidate.
    host.set_block(DIM, BlockPos::new(5, 64, 4), block::STONE);
    assert!(rx.try_recv().is_err());
}

#[test]
fn unloading_a_chunk_cuts_the_path_and_loading_it_restores_it() {
    let mut host = StarlightHost::new(
        TransmissionConfig::default(),
        Box::new(starlight_engine::cache::MemoryBackend::new()),
    );
    host.load_world(DIM);
    host.load_chunk(DIM, ORIGIN);
    host.load_chunk(DIM, ChunkPos::new(0, 1));

    let source = host.place_device(DIM, BlockPos::new(8, 64, 8), collector()).unwrap();
    let relay = host
        .place_device(DIM, BlockPos::new(8, 64, 20), NodeCapability::Relay)
        .unwrap();
    let sink = host
        .place_device(DIM, BlockPos::new(8, 64, 30), NodeCapability::Consumer { demand: 1.0 })
        .unwrap();

    let path = host.query(source, NodeKind::Consumer, None).into_path().unwrap();
    assert_eq!(path.nodes, vec![source, relay, sink]);
    assert!(host.deliverable(sink) > 0.0);

    host.unload_chunk(DIM, ChunkPos::new(0, 1));
    assert!(!host.query(source, NodeKind::Consumer, None).is_found());
    assert_eq!(host.deliverable(sink), 0.0);

    host.load_chunk(DIM, ChunkPos::new(0, 1));
    assert_eq!(host.query(source, NodeKind::Consumer, None).into_path(), Some(path));
}

#[test]
fn integrity_check_drops_devices_edited_out_of_the_world() {
    let mut host = StarlightHost::new(
        TransmissionConfig::default(),
        Box::new(starlight_engine::cache::MemoryBackend::new()),
    );
    host.load_world(DIM);
    host.load_chunk(DIM, ORIGIN);

    let relay_pos = BlockPos::new(1, 64, 1);
    let gate_pos = BlockPos::new(9, 64, 9);
    host.place_device(DIM, relay_pos, NodeCapability::Relay).unwrap();
    host.place_device(
        DIM,
        gate_pos,
        NodeCapability::Gateway {
            name: "market".into(),
            destinations: Vec::new(),
        },
    )
    .unwrap();
    assert_eq!(host.gateways(DIM).unwrap().len(), 1);

    // An external edit: the world changes without the network hearing of it.
    let world = host.world(DIM).unwrap();
    world.set_block(relay_pos, block::STONE);
    world.set_block(gate_pos, block::AIR);
    assert_eq!(host.node_count(DIM), 2);

    let report = host.check_integrity(DIM).unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.stale, 2);
    assert_eq!(host.node_count(DIM), 0);
    assert!(host.gateways(DIM).unwrap().is_empty());
    assert_eq!(host.snapshot().nodes_pruned, 2);

    let clean = host.check_integrity(DIM).unwrap();
    assert!(clean.is_clean());
}
