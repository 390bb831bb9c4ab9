//! Prometheus-compatible selection metrics
//!
//! The engine updates these counters as it runs; a host that serves
//! `/metrics` can share the `Arc` and render [`SelectionMetrics::to_prometheus`].

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Rolling window size for selection latency percentiles
const LATENCY_HISTORY_SAMPLES: usize = 1000;

/// Minimum samples before percentiles are published
const MIN_PERCENTILE_SAMPLES: usize = 10;

/// Metrics registry for one selection engine
#[derive(Debug)]
pub struct SelectionMetrics {
    // Population
    pub participants: AtomicU64,

    // Selection counters
    pub selections_total: AtomicU64,
    pub empty_selections: AtomicU64,
    pub candidates_scored: AtomicU64,
    pub peers_returned: AtomicU64,

    // Index maintenance
    pub index_rebuilds: AtomicU64,
    pub incremental_moves: AtomicU64,

    // Rejected inserts/updates (out of world or non-finite)
    pub rejected_samples: AtomicU64,

    // Selection timing (microseconds)
    pub selection_time_us: AtomicU64,
    pub selection_time_p95_us: AtomicU64,
    pub selection_time_p99_us: AtomicU64,

    start_time: Instant,

    // Rolling selection times for percentile calculation
    selection_history: RwLock<VecDeque<u64>>,
}

impl SelectionMetrics {
    pub fn new() -> Self {
        Self {
            participants: AtomicU64::new(0),
            selections_total: AtomicU64::new(0),
            empty_selections: AtomicU64::new(0),
            candidates_scored: AtomicU64::new(0),
            peers_returned: AtomicU64::new(0),
            index_rebuilds: AtomicU64::new(0),
            incremental_moves: AtomicU64::new(0),
            rejected_samples: AtomicU64::new(0),
            selection_time_us: AtomicU64::new(0),
            selection_time_p95_us: AtomicU64::new(0),
            selection_time_p99_us: AtomicU64::new(0),
            start_time: Instant::now(),
            selection_history: RwLock::new(VecDeque::with_capacity(LATENCY_HISTORY_SAMPLES)),
        }
    }

    /// Record one completed selection
    ///
    /// Only appends to the rolling window; percentiles are recomputed by
    /// [`Self::refresh_percentiles`] when metrics are rendered.
    pub fn record_selection(&self, duration: Duration, candidates: usize, returned: usize) {
        let us = duration.as_micros() as u64;
        self.selection_time_us.store(us, Ordering::Relaxed);
        self.selections_total.fetch_add(1, Ordering::Relaxed);
        self.candidates_scored.fetch_add(candidates as u64, Ordering::Relaxed);
        self.peers_returned.fetch_add(returned as u64, Ordering::Relaxed);

        let mut history = self.selection_history.write();
        // Evict before pushing so the deque never grows past its initial capacity
        while history.len() >= LATENCY_HISTORY_SAMPLES {
            history.pop_front();
        }
        history.push_back(us);
    }

    /// Recompute p95/p99 selection time from the rolling window
    pub fn refresh_percentiles(&self) {
        let mut sorted: Vec<u64> = {
            let history = self.selection_history.read();
            if history.len() < MIN_PERCENTILE_SAMPLES {
                return;
            }
            history.iter().copied().collect()
        };
        sorted.sort_unstable();

        let last = sorted.len() - 1;
        let p95_idx = (sorted.len() as f64 * 0.95) as usize;
        let p99_idx = (sorted.len() as f64 * 0.99) as usize;

        self.selection_time_p95_us.store(sorted[p95_idx.min(last)], Ordering::Relaxed);
        self.selection_time_p99_us.store(sorted[p99_idx.min(last)], Ordering::Relaxed);
    }

    /// Number of selection times currently in the rolling window
    pub fn history_len(&self) -> usize {
        self.selection_history.read().len()
    }

    /// Selection requested for a sender the engine does not know
    pub fn record_empty_selection(&self) {
        self.selections_total.fetch_add(1, Ordering::Relaxed);
        self.empty_selections.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        self.refresh_percentiles();
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                let _ = write!(
                    output,
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                );
            };
        }

        metric!("peer_fanout_participants", "Participants known to the engine", "gauge",
            self.participants.load(Ordering::Relaxed));

        metric!("peer_fanout_selections_total", "Peer selections requested", "counter",
            self.selections_total.load(Ordering::Relaxed));
        metric!("peer_fanout_empty_selections_total", "Selections for an unknown sender", "counter",
            self.empty_selections.load(Ordering::Relaxed));
        metric!("peer_fanout_candidates_scored_total", "Candidates scored inside the causal horizon", "counter",
            self.candidates_scored.load(Ordering::Relaxed));
        metric!("peer_fanout_peers_returned_total", "Peers returned with a probability", "counter",
            self.peers_returned.load(Ordering::Relaxed));

        metric!("peer_fanout_index_rebuilds_total", "Full spatial index rebuilds", "counter",
            self.index_rebuilds.load(Ordering::Relaxed));
        metric!("peer_fanout_incremental_moves_total", "Incremental spatial index moves", "counter",
            self.incremental_moves.load(Ordering::Relaxed));
        metric!("peer_fanout_rejected_samples_total", "Inserts or updates rejected as invalid", "counter",
            self.rejected_samples.load(Ordering::Relaxed));

        metric!("peer_fanout_selection_time_microseconds", "Last selection time in microseconds", "gauge",
            self.selection_time_us.load(Ordering::Relaxed));
        metric!("peer_fanout_selection_time_p95_microseconds", "95th percentile selection time", "gauge",
            self.selection_time_p95_us.load(Ordering::Relaxed));
        metric!("peer_fanout_selection_time_p99_microseconds", "99th percentile selection time", "gauge",
            self.selection_time_p99_us.load(Ordering::Relaxed));

        metric!("peer_fanout_uptime_seconds", "Engine uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }
}

impl Default for SelectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
