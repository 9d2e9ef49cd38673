use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use starlight_engine::cache::CacheBackend;
use starlight_engine::network::{Constellation, NetworkError, NodeCapability, NodeId, NodeKind, QueryResult};
use starlight_engine::world::position::{BlockPos, ChunkPos, DimensionId};
use starlight_server::config::ServerConfig;
use starlight_server::host::StarlightHost;
use starlight_server::persistence::{self, FileBackend, QueuedFileBackend};

/// Chunks streamed in around the origin, in each direction.
const DEMO_RADIUS: i32 = 2;

#[tokio::main]
async fn main() {
    let config_path: PathBuf = std::env::args()
        .skip_while(|a| a != "--config")
        .nth(1)
        .unwrap_or_else(|| "starlight.toml".into())
        .into();
    let world_override: Option<PathBuf> = std::env::args()
        .skip_while(|a| a != "--world")
        .nth(1)
        .map(PathBuf::from);
    let check_integrity = std::env::args().any(|a| a == "--check-integrity");
    let serve = std::env::args().any(|a| a == "--serve");
    let dump_dot = std::env::args().any(|a| a == "--dot");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Bad config: {:#}", e);
            return;
        }
    };
    if let Some(dir) = world_override {
        config.world_dir = dir;
    }
    if check_integrity {
        config.transmission.integrity_check_on_load = true;
    }

    tracing::info!("Starlight network host, world at {}", config.world_dir.display());

    // ── Cache backend ────────────────────────────────────────────────────
    let files = FileBackend::new(&config.world_dir);
    let queue = config
        .queued_writes
        .then(|| QueuedFileBackend::spawn(files.clone()));
    let backend: Box<dyn CacheBackend> = match &queue {
        Some(queue) => Box::new(queue.clone()),
        None => Box::new(files),
    };
    let mut host = StarlightHost::new(config.transmission.clone(), backend);

    // ── Worlds ───────────────────────────────────────────────────────────
    let mut dimensions = match persistence::saved_dimensions(&config.world_dir) {
        Ok(dims) => dims,
        Err(e) => {
            tracing::error!("Failed to list saved dimensions: {:#}", e);
            Vec::new()
        }
    };
    if !dimensions.contains(&DimensionId::OVERWORLD) {
        dimensions.insert(0, DimensionId::OVERWORLD);
    }

    for &dim in &dimensions {
        generate_flat_terrain(&mut host, dim, DEMO_RADIUS);
        if dim == DimensionId::OVERWORLD {
            write_demo_device_blocks(&host, dim);
        }
        host.load_world(dim);
        for cx in -DEMO_RADIUS..DEMO_RADIUS {
            for cz in -DEMO_RADIUS..DEMO_RADIUS {
                host.load_chunk(dim, ChunkPos::new(cx, cz));
            }
        }
    }

    let (collector, altar) = place_demo_devices(&mut host, DimensionId::OVERWORLD);
    report_demo(&mut host, collector, altar);

    if dump_dot {
        if let Some(dot) = host.dot(DimensionId::OVERWORLD) {
            print!("{}", dot);
        }
    }

    let host = Arc::new(Mutex::new(host));

    if serve {
        serve_until_ctrl_c(
            Arc::clone(&host),
            queue.clone(),
            Duration::from_secs(config.autosave_secs.max(1)),
        )
        .await;
    }

    // ── Save on exit ─────────────────────────────────────────────────────
    let mut host = host.lock().await;
    match host.save_all() {
        Ok(n) => tracing::info!("Exit save complete: {} records written", n),
        Err(e) => tracing::error!("Exit save failed: {:#}", e),
    }
    match serde_json::to_string_pretty(&host.snapshot()) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!("Failed to encode metrics: {}", e),
    }
    for dim in host.dimensions() {
        host.unload_world(dim);
    }
    drop(host);
    if let Some(queue) = queue {
        if let Err(e) = queue.drain().await {
            tracing::error!("Cache writes lost on exit: {:#}", e);
        }
    }
}

async fn serve_until_ctrl_c(host: Arc<Mutex<StarlightHost>>, queue: Option<QueuedFileBackend>, autosave: Duration) {
    let mut changes = host.lock().await.subscribe();
    tokio::spawn(async move {
        while let Ok(batch) = changes.recv().await {
            tracing::debug!("{}: {} network changes", batch.dimension, batch.changes.len());
        }
    });

    let save_host = Arc::clone(&host);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(autosave);
        interval.tick().await; // first tick is immediate, skip it
        loop {
            interval.tick().await;
            match save_host.lock().await.save_all() {
                Ok(n) => tracing::info!("Autosave complete: {} records", n),
                Err(e) => tracing::error!("Autosave failed: {:#}", e),
            }
            if let Some(queue) = &queue {
                let retried = queue.retry_pending();
                if retried > 0 {
                    tracing::debug!("Requeued {} unwritten cache files", retried);
                }
            }
        }
    });

    tracing::info!("Serving; Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for Ctrl+C: {}", e);
    }
    tracing::info!("Ctrl+C received, shutting down...");
}

// ── Demo layout ──────────────────────────────────────────────────────────────

const SURFACE_Y: i64 = 65;

fn demo_devices() -> Vec<(BlockPos, NodeCapability)> {
    vec![
        (
            BlockPos::new(0, SURFACE_Y, 0),
            NodeCapability::Collector {
                rate: 1.0,
                attunement: Constellation::Aevitas,
            },
        ),
        (BlockPos::new(0, SURFACE_Y, 12), NodeCapability::Relay),
        (
            BlockPos::new(10, SURFACE_Y, 20),
            NodeCapability::Prism {
                attunement: Some(Constellation::Aevitas),
            },
        ),
        (
            BlockPos::new(10, SURFACE_Y, 30),
            NodeCapability::Consumer { demand: 1.0 },
        ),
        (
            BlockPos::new(-8, SURFACE_Y, 12),
            NodeCapability::Gateway {
                name: "spawn".into(),
                destinations: Vec::new(),
            },
        ),
    ]
}

/// Bedrock at y=60, stone y=61-63, dirt at y=64.
fn generate_flat_terrain(host: &mut StarlightHost, dim: DimensionId, chunk_radius: i32) {
    use starlight_engine::world::chunk::Chunk;
    use starlight_engine::world::position::LocalBlockPos;
    use starlight_server::block;

    for cx in -chunk_radius..chunk_radius {
        for cz in -chunk_radius..chunk_radius {
            let mut chunk = Chunk::new();
            for x in 0..16u8 {
                for z in 0..16u8 {
                    chunk.set_block(LocalBlockPos { x, y: 60, z }, block::BEDROCK);
                    for y in 61..=63i64 {
                        chunk.set_block(LocalBlockPos { x, y, z }, block::STONE);
                    }
                    chunk.set_block(LocalBlockPos { x, y: 64, z }, block::DIRT);
                }
            }
            host.insert_chunk(dim, ChunkPos::new(cx, cz), chunk);
        }
    }
}

/// Terrain is regenerated every run, so devices saved by an earlier run
/// need their blocks back before the integrity check looks for them.
fn write_demo_device_blocks(host: &StarlightHost, dim: DimensionId) {
    let Some(world) = host.world(dim) else {
        return;
    };
    for (pos, capability) in demo_devices() {
        world.set_block(pos, starlight_server::block::device_block(capability.kind()));
    }
}

fn place_demo_devices(host: &mut StarlightHost, dim: DimensionId) -> (NodeId, NodeId) {
    for (pos, capability) in demo_devices() {
        match host.place_device(dim, pos, capability) {
            Ok(id) => tracing::info!("Placed {}", id),
            Err(NetworkError::DuplicateNode { id }) => tracing::debug!("{} already saved", id),
            Err(e) => tracing::warn!("Could not place demo device: {}", e),
        }
    }
    (
        NodeId::new(dim, BlockPos::new(0, SURFACE_Y, 0)),
        NodeId::new(dim, BlockPos::new(10, SURFACE_Y, 30)),
    )
}

fn report_demo(host: &mut StarlightHost, collector: NodeId, altar: NodeId) {
    match host.query(collector, NodeKind::Consumer, None) {
        QueryResult::Found(path) => {
            let hops: Vec<String> = path.nodes.iter().map(|id| id.to_string()).collect();
            tracing::info!(
                "Best path ({} hops, loss {:.3}, {:.1} blocks): {}",
                path.hops(),
                path.loss,
                path.length,
                hops.join(" -> ")
            );
        }
        QueryResult::NoPathFound => tracing::warn!("No path from {} to any consumer", collector),
    }
    tracing::info!("Deliverable at {}: {:.3} per tick", altar, host.deliverable(altar));

    match host.gateways(altar.dimension) {
        Ok(gateways) => {
            for gateway in gateways {
                tracing::info!(
                    "Gateway {:?} at ({},{},{})",
                    gateway.name,
                    gateway.pos.x,
                    gateway.pos.y,
                    gateway.pos.z
                );
            }
        }
        Err(e) => tracing::error!("{:#}", e),
    }
}
