//! On-disk storage for starlight cache records.
//!
//! Each record is one gzip-compressed NBT file at
//! `<world>/starlight/DIM<n>/<key>.dat`. Files are written to a `.tmp`
//! sibling first and renamed into place, so a crash mid-write leaves the
//! previous save intact.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tokio::sync::{mpsc, oneshot};

use starlight_engine::cache::CacheBackend;
use starlight_engine::world::position::DimensionId;

const CACHE_DIR: &str = "starlight";

// ── Direct file backend ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(world_dir: &Path) -> Self {
        Self {
            root: world_dir.join(CACHE_DIR),
        }
    }

    pub fn path_for(&self, dimension: DimensionId, key: &str) -> PathBuf {
        self.root.join(dimension.to_string()).join(format!("{key}.dat"))
    }

    fn read_file(&self, dimension: DimensionId, key: &str) -> io::Result<Option<Vec<u8>>> {
        let compressed = match fs::read(self.path_for(dimension, key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut bytes = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn write_file(&self, dimension: DimensionId, key: &str, bytes: &[u8]) -> io::Result<()> {
        let start = Instant::now();
        let path = self.path_for(dimension, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        let compressed = encoder.finish()?;

        let tmp = path.with_extension("dat.tmp");
        fs::write(&tmp, &compressed)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(
            "Wrote {} ({} -> {} bytes, {:.2?})",
            path.display(),
            bytes.len(),
            compressed.len(),
            start.elapsed()
        );
        Ok(())
    }
}

impl CacheBackend for FileBackend {
    fn read(&self, dimension: DimensionId, key: &str) -> io::Result<Option<Vec<u8>>> {
        self.read_file(dimension, key)
    }

    fn write(&self, dimension: DimensionId, key: &str, bytes: Vec<u8>) -> io::Result<()> {
        self.write_file(dimension, key, &bytes)
    }
}

/// Dimensions that have a cache directory under `world_dir`, in id order.
pub fn saved_dimensions(world_dir: &Path) -> Result<Vec<DimensionId>> {
    let root = world_dir.join(CACHE_DIR);
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dims = Vec::new();
    for entry in fs::read_dir(&root).with_context(|| format!("listing {}", root.display()))? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        match name.strip_prefix("DIM").and_then(|n| n.parse::<i32>().ok()) {
            Some(id) if entry.path().is_dir() => dims.push(DimensionId(id)),
            _ => tracing::warn!("Skipping unexpected entry in cache dir: {}", name),
        }
    }
    dims.sort();
    Ok(dims)
}

// ── Queued backend ───────────────────────────────────────────────────────────

type PendingKey = (DimensionId, String);

enum Job {
    Write {
        dimension: DimensionId,
        key: String,
        generation: u64,
    },
    Flush(oneshot::Sender<()>),
}

/// File backend whose writes run on a tokio task.
///
/// `write` only records the blob and queues a job, so saving from the
/// simulation thread never waits on the disk. Until a queued write lands,
/// `read` answers from the pending map, which keeps a quick unload/reload
/// of a dimension from reading the previous file. Clones share the queue.
#[derive(Clone)]
pub struct QueuedFileBackend {
    files: Arc<FileBackend>,
    pending: Arc<DashMap<PendingKey, (u64, Vec<u8>)>>,
    generation: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<Job>,
}

impl QueuedFileBackend {
    /// Start the writer task. Must be called from within a tokio runtime.
    pub fn spawn(files: FileBackend) -> Self {
        let files = Arc::new(files);
        let pending = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&files), Arc::clone(&pending), rx));
        Self {
            files,
            pending,
            generation: Arc::new(AtomicU64::new(0)),
            tx,
        }
    }

    pub fn files(&self) -> &FileBackend {
        &self.files
    }

    /// Writes accepted but not yet on disk.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queue another attempt for every write that has not landed yet.
    /// Returns how many were queued.
    pub fn retry_pending(&self) -> usize {
        let jobs: Vec<Job> = self
            .pending
            .iter()
            .map(|entry| Job::Write {
                dimension: entry.key().0,
                key: entry.key().1.clone(),
                generation: entry.value().0,
            })
            .collect();
        let count = jobs.len();
        for job in jobs {
            if self.tx.send(job).is_err() {
                return 0;
            }
        }
        count
    }

    /// Retry anything still pending and wait for the queue to empty.
    /// Fails if a write accepted before this call still hasn't landed.
    pub async fn drain(&self) -> Result<()> {
        let cutoff = self.generation.load(Ordering::Relaxed);
        self.retry_pending();
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Job::Flush(done_tx))
            .map_err(|_| anyhow::anyhow!("cache writer task has stopped"))?;
        done_rx.await.context("cache writer task stopped mid-drain")?;

        let failed: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().0 < cutoff)
            .map(|entry| format!("{}/{}", entry.key().0, entry.key().1))
            .collect();
        if !failed.is_empty() {
            anyhow::bail!("{} cache writes did not land: {}", failed.len(), failed.join(", "));
        }
        Ok(())
    }
}

impl CacheBackend for QueuedFileBackend {
    fn read(&self, dimension: DimensionId, key: &str) -> io::Result<Option<Vec<u8>>> {
        if let Some(entry) = self.pending.get(&(dimension, key.to_string())) {
            return Ok(Some(entry.value().1.clone()));
        }
        self.files.read_file(dimension, key)
    }

    fn write(&self, dimension: DimensionId, key: &str, bytes: Vec<u8>) -> io::Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.pending.insert((dimension, key.to_string()), (generation, bytes));
        self.tx
            .send(Job::Write {
                dimension,
                key: key.to_string(),
                generation,
            })
            .map_err(|_| io::Error::other("cache writer task has stopped"))
    }
}

async fn run_writer(
    files: Arc<FileBackend>,
    pending: Arc<DashMap<PendingKey, (u64, Vec<u8>)>>,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = rx.recv().await {
        let (dimension, key, generation) = match job {
            Job::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            Job::Write {
                dimension,
                key,
                generation,
            } => (dimension, key, generation),
        };

        let slot = (dimension, key);
        // A newer write for the same file has its own job further down the
        // queue; skip this one.
        let Some(bytes) = pending
            .get(&slot)
            .filter(|entry| entry.value().0 == generation)
            .map(|entry| entry.value().1.clone())
        else {
            continue;
        };

        let writer = Arc::clone(&files);
        let key = slot.1.clone();
        let result = tokio::task::spawn_blocking(move || writer.write_file(dimension, &key, &bytes)).await;
        match result {
            Ok(Ok(())) => {
                pending.remove_if(&slot, |_, entry| entry.0 == generation);
            }
            // Left pending, so reads still see it; `retry_pending` and `drain` try again.
            Ok(Err(e)) => tracing::error!("Writing {} for {} failed: {}", slot.1, dimension, e),
            Err(e) => tracing::error!("Cache writer for {} {} panicked: {}", dimension, slot.1, e),
        }
    }
    tracing::debug!("Cache writer stopped");
}

// ── Tests ────────────────────────────────────────────────────────────────────
