//! Selection engine: participant lifecycle plus per-round peer fan-out scoring
//!
//! For a `(sender, subject)` pair the engine looks up every participant inside
//! the sender's causal horizon, scores each one (see [`crate::engine::scoring`])
//! and turns the weights into per-peer probabilities:
//!
//! `prob_j = (1 - epsilon) * w_j / sum(w) + epsilon / N`
//!
//! These are **independent** selection probabilities, not a distribution over a
//! single winner. Callers gate each peer with its own Bernoulli draw
//! ([`sample_fanout`]), so the expected fan-out is the sum of probabilities.
//!
//! The engine is single-owner and synchronous. Hosts that share it across
//! threads must serialize access themselves.

use std::cell::RefCell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::{EngineConfig, IndexStrategy};
use crate::engine::participant::{ParticipantId, ParticipantRecord, ParticipantStore, ParticipantUpdate};
use crate::engine::scoring::{normalize, peer_weight, total_weight};
use crate::engine::spatial::{IndexedPoint, QuadTree, QuadTreeStats};
use crate::engine::EngineError;
use crate::metrics::SelectionMetrics;
use crate::util::vec2::Vec2;

/// Initial capacity for the per-thread scratch buffers
const SCRATCH_INITIAL_CAPACITY: usize = 256;

/// Reusable buffers for the selection hot path
struct Scratch {
    candidates: Vec<IndexedPoint>,
    weights: Vec<(ParticipantId, f64)>,
}

// Thread-local scratch space to avoid per-selection allocations beyond the result
thread_local! {
    static SCRATCH: RefCell<Scratch> = RefCell::new(Scratch {
        candidates: Vec::with_capacity(SCRATCH_INITIAL_CAPACITY),
        weights: Vec::with_capacity(SCRATCH_INITIAL_CAPACITY),
    });
}

/// One peer and the probability it should receive a direct update this round
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerSelection {
    pub peer_id: ParticipantId,
    pub probability: f64,
}

/// Independently Bernoulli-sample each selection, returning the peers to push to
pub fn sample_fanout<R: Rng>(selections: &[PeerSelection], rng: &mut R) -> Vec<ParticipantId> {
    selections
        .iter()
        .filter(|s| rng.gen::<f64>() < s.probability)
        .map(|s| s.peer_id)
        .collect()
}

/// Owns the participant store and the spatial index built over it
pub struct SelectionEngine {
    config: EngineConfig,
    /// Cached `config.causal_horizon()`
    horizon: f64,
    store: ParticipantStore,
    index: QuadTree,
    metrics: Arc<SelectionMetrics>,
}

impl SelectionEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_metrics(config, Arc::new(SelectionMetrics::new()))
    }

    /// Create an engine reporting into a shared metrics registry
    pub fn with_metrics(config: EngineConfig, metrics: Arc<SelectionMetrics>) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;

        let index = QuadTree::for_world(config.world_size, config.node_capacity, config.max_depth);
        debug!(
            "Selection engine: world={} depth={} capacity={} horizon={} strategy={:?}",
            config.world_size,
            config.max_depth,
            config.node_capacity,
            config.causal_horizon(),
            config.index_strategy
        );

        Ok(Self {
            horizon: config.causal_horizon(),
            config,
            store: ParticipantStore::new(),
            index,
            metrics,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Insert a participant at rest with neutral time scaling and zero latency
    ///
    /// An existing id is replaced and re-indexed at the new position.
    pub fn insert_participant(&mut self, id: ParticipantId, x: f64, y: f64) -> Result<(), EngineError> {
        self.commit(ParticipantRecord::new(id, Vec2::new(x, y)))
    }

    /// Replace the full record for `id`, creating it if absent
    pub fn update_participant(&mut self, id: ParticipantId, update: ParticipantUpdate) -> Result<(), EngineError> {
        if !update.has_finite_signals() {
            self.metrics.rejected_samples.fetch_add(1, Ordering::Relaxed);
            warn!("Rejected non-finite sample for participant {}", id);
            return Err(EngineError::InvalidSample(id));
        }
        self.commit(ParticipantRecord::from_update(id, update))
    }

    /// Remove a participant from both the store and the index
    pub fn remove_participant(&mut self, id: ParticipantId) -> Option<ParticipantRecord> {
        let removed = self.store.remove(id)?;

        match self.config.index_strategy {
            IndexStrategy::Rebuild => self.rebuild_index(),
            IndexStrategy::Incremental => {
                let found = self.index.remove(id, removed.position);
                debug_assert!(found, "index out of sync with store for {}", id);
            }
        }

        self.metrics.participants.store(self.store.len() as u64, Ordering::Relaxed);
        debug!("Participant {} removed ({} remaining)", id, self.store.len());
        Some(removed)
    }

    /// Store `record` and bring the index up to date. Nothing changes on error.
    fn commit(&mut self, record: ParticipantRecord) -> Result<(), EngineError> {
        let id = record.id;
        let position = record.position;

        if !self.index.bounds().contains(position) {
            self.metrics.rejected_samples.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Rejected participant {} at ({}, {}): outside world of size {}",
                id, position.x, position.y, self.config.world_size
            );
            return Err(EngineError::OutOfWorld(id, position.x, position.y));
        }

        let previous = self.store.upsert(record);

        match self.config.index_strategy {
            IndexStrategy::Rebuild => self.rebuild_index(),
            IndexStrategy::Incremental => {
                if let Some(previous) = previous {
                    let found = self.index.remove(id, previous.position);
                    debug_assert!(found, "index out of sync with store for {}", id);
                }
                self.index.insert(id, position);
                self.metrics.incremental_moves.fetch_add(1, Ordering::Relaxed);
            }
        }

        if previous.is_none() {
            self.metrics.participants.store(self.store.len() as u64, Ordering::Relaxed);
            debug!("Participant {} joined at ({}, {})", id, position.x, position.y);
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        let rejected = self.index.rebuild(self.store.positions());
        debug_assert_eq!(rejected, 0, "store holds positions outside the world");
        self.metrics.index_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Score every peer inside the sender's causal horizon for an update about `subject_id`
    ///
    /// Returns peers ordered by descending probability (ties by id). An unknown
    /// sender yields an empty result; an unknown subject is an error.
    pub fn select_peers(
        &self,
        sender_id: ParticipantId,
        subject_id: ParticipantId,
    ) -> Result<Vec<PeerSelection>, EngineError> {
        let started = Instant::now();

        let Some(sender) = self.store.get(sender_id).copied() else {
            trace!("Selection for unknown sender {}", sender_id);
            self.metrics.record_empty_selection();
            return Ok(Vec::new());
        };

        let subject = if subject_id == sender_id {
            sender
        } else {
            self.store
                .get(subject_id)
                .copied()
                .ok_or(EngineError::UnknownParticipant(subject_id))?
        };

        let population = self.store.len();
        let epsilon = self.config.epsilon;

        let (mut selections, candidate_count) = SCRATCH.with(|cell| {
            let mut scratch = cell.borrow_mut();
            let Scratch { candidates, weights } = &mut *scratch;
            candidates.clear();
            weights.clear();

            self.index.query_into(sender.position, self.horizon, candidates);

            for candidate in candidates.iter() {
                if candidate.id == sender_id {
                    continue;
                }
                // Stale index entry: skip rather than score a ghost
                let Some(peer) = self.store.get(candidate.id) else {
                    continue;
                };
                weights.push((peer.id, peer_weight(&self.config, &sender, &subject, peer)));
            }

            let total = total_weight(weights);
            let selections: Vec<PeerSelection> = weights
                .iter()
                .map(|&(peer_id, weight)| PeerSelection {
                    peer_id,
                    probability: normalize(weight, total, epsilon, population),
                })
                .collect();

            (selections, candidates.len())
        });

        selections.sort_unstable_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then(a.peer_id.cmp(&b.peer_id))
        });

        trace!(
            "Selection sender={} subject={}: {} candidates, {} peers",
            sender_id,
            subject_id,
            candidate_count,
            selections.len()
        );
        self.metrics
            .record_selection(started.elapsed(), candidate_count, selections.len());

        Ok(selections)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn participant(&self, id: ParticipantId) -> Option<&ParticipantRecord> {
        self.store.get(id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.store.contains(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.store.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Radius within which peers are considered for direct delivery
    pub fn causal_horizon(&self) -> f64 {
        self.horizon
    }

    pub fn index_stats(&self) -> QuadTreeStats {
        self.index.stats()
    }

    pub fn metrics(&self) -> &Arc<SelectionMetrics> {
        &self.metrics
    }
}
