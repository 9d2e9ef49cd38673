//! Lock-free network counters.
//!
//! The host bumps these with relaxed atomic adds on every query and
//! maintenance pass. Readers take a [`MetricsSnapshot`] whenever they like.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Monotonic counters
    queries: AtomicU64,
    paths_found: AtomicU64,
    no_path: AtomicU64,
    query_ns_sum: AtomicU64,
    nodes_created: AtomicU64,
    nodes_removed: AtomicU64,
    nodes_pruned: AtomicU64,
    records_saved: AtomicU64,

    // Query latency histogram buckets
    hist_under_1us: AtomicU64,
    hist_1_10us: AtomicU64,
    hist_10_100us: AtomicU64,
    hist_100us_1ms: AtomicU64,
    hist_over_1ms: AtomicU64,

    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            queries: AtomicU64::new(0),
            paths_found: AtomicU64::new(0),
            no_path: AtomicU64::new(0),
            query_ns_sum: AtomicU64::new(0),
            nodes_created: AtomicU64::new(0),
            nodes_removed: AtomicU64::new(0),
            nodes_pruned: AtomicU64::new(0),
            records_saved: AtomicU64::new(0),
            hist_under_1us: AtomicU64::new(0),
            hist_1_10us: AtomicU64::new(0),
            hist_10_100us: AtomicU64::new(0),
            hist_100us_1ms: AtomicU64::new(0),
            hist_over_1ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Called after each query, whatever its outcome. The duration includes
    /// any graph rebuild the query triggered.
    pub fn record_query(&self, found: bool, duration: Duration) {
        self.queries.fetch_add(1, Relaxed);
        if found {
            self.paths_found.fetch_add(1, Relaxed);
        } else {
            self.no_path.fetch_add(1, Relaxed);
        }
        self.query_ns_sum.fetch_add(duration.as_nanos() as u64, Relaxed);

        let bucket = match duration.as_micros() as u64 {
            0 => &self.hist_under_1us,
            1..=9 => &self.hist_1_10us,
            10..=99 => &self.hist_10_100us,
            100..=999 => &self.hist_100us_1ms,
            _ => &self.hist_over_1ms,
        };
        bucket.fetch_add(1, Relaxed);
    }

    pub fn node_created(&self) {
        self.nodes_created.fetch_add(1, Relaxed);
    }

    pub fn node_removed(&self) {
        self.nodes_removed.fetch_add(1, Relaxed);
    }

    pub fn nodes_pruned(&self, count: u64) {
        self.nodes_pruned.fetch_add(count, Relaxed);
    }

    pub fn records_saved(&self, count: u64) {
        self.records_saved.fetch_add(count, Relaxed);
    }

    /// Read all counters. `rebuilds` and `active_nodes` come from the
    /// handlers, which already count them.
    pub fn snapshot(&self, rebuilds: u64, active_nodes: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            queries: self.queries.load(Relaxed),
            paths_found: self.paths_found.load(Relaxed),
            no_path: self.no_path.load(Relaxed),
            query_ns_sum: self.query_ns_sum.load(Relaxed),
            rebuilds,
            active_nodes,
            nodes_created: self.nodes_created.load(Relaxed),
            nodes_removed: self.nodes_removed.load(Relaxed),
            nodes_pruned: self.nodes_pruned.load(Relaxed),
            records_saved: self.records_saved.load(Relaxed),
            hist: [
                self.hist_under_1us.load(Relaxed),
                self.hist_1_10us.load(Relaxed),
                self.hist_10_100us.load(Relaxed),
                self.hist_100us_1ms.load(Relaxed),
                self.hist_over_1ms.load(Relaxed),
            ],
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of all metrics at a point in time.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub queries: u64,
    pub paths_found: u64,
    pub no_path: u64,
    pub query_ns_sum: u64,
    pub rebuilds: u64,
    pub active_nodes: u64,
    pub nodes_created: u64,
    pub nodes_removed: u64,
    pub nodes_pruned: u64,
    pub records_saved: u64,
    /// Query latency, `[<1μs, 1-10μs, 10-100μs, 100μs-1ms, >1ms]`
    pub hist: [u64; 5],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_land_in_one_bucket_each() {
        let metrics = Metrics::new();
        metrics.record_query(true, Duration::from_nanos(300));
        metrics.record_query(false, Duration::from_micros(50));
        metrics.record_query(true, Duration::from_millis(3));

        let snap = metrics.snapshot(2, 7);
        assert_eq!(snap.queries, 3);
        assert_eq!(snap.paths_found, 2);
        assert_eq!(snap.no_path, 1);
        assert_eq!(snap.hist, [1, 0, 1, 0, 1]);
        assert_eq!(snap.rebuilds, 2);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["active_nodes"], 7);
    }
}
