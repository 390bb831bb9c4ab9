//! Participant records and the store the engine keeps them in

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::util::vec2::Vec2;

/// Stable participant identifier, assigned by the discovery layer
pub type ParticipantId = u64;

/// Neutral time-scaling factor given to freshly inserted participants
pub const NEUTRAL_TDF: f64 = 1.0;

/// Initial capacity for the participant map
const STORE_INITIAL_CAPACITY: usize = 64;

/// Latest known state of one participant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Perceived time-scaling factor, nominally 1.0
    pub tdf: f64,
    /// Observed one-way latency in seconds
    pub latency: f64,
}

impl ParticipantRecord {
    /// Fresh record: at rest, neutral time scaling, zero latency
    pub fn new(id: ParticipantId, position: Vec2) -> Self {
        Self {
            id,
            position,
            velocity: Vec2::ZERO,
            tdf: NEUTRAL_TDF,
            latency: 0.0,
        }
    }

    /// Record built from a full state sample
    pub fn from_update(id: ParticipantId, update: ParticipantUpdate) -> Self {
        Self {
            id,
            position: update.position,
            velocity: update.velocity,
            tdf: update.tdf,
            latency: update.latency,
        }
    }
}

/// One update cycle's worth of state for a participant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    pub position: Vec2,
    pub velocity: Vec2,
    pub tdf: f64,
    pub latency: f64,
}

impl ParticipantUpdate {
    pub fn new(x: f64, y: f64, vx: f64, vy: f64, tdf: f64, latency: f64) -> Self {
        Self {
            position: Vec2::new(x, y),
            velocity: Vec2::new(vx, vy),
            tdf,
            latency,
        }
    }

    /// Velocity, time scaling and latency are all finite numbers
    ///
    /// Position is checked separately against the world bounds.
    pub fn has_finite_signals(&self) -> bool {
        self.velocity.is_finite() && self.tdf.is_finite() && self.latency.is_finite()
    }
}

/// Participant records keyed by id
#[derive(Debug, Clone)]
pub struct ParticipantStore {
    records: HashMap<ParticipantId, ParticipantRecord>,
}

impl ParticipantStore {
    pub fn new() -> Self {
        Self {
            records: HashMap::with_capacity(STORE_INITIAL_CAPACITY),
        }
    }

    /// Insert or replace, returning the previous record
    pub fn upsert(&mut self, record: ParticipantRecord) -> Option<ParticipantRecord> {
        self.records.insert(record.id, record)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&ParticipantRecord> {
        self.records.get(&id)
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<ParticipantRecord> {
        self.records.remove(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.records.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.records.values()
    }

    /// `(id, position)` pairs for rebuilding the spatial index
    pub fn positions(&self) -> impl Iterator<Item = (ParticipantId, Vec2)> + '_ {
        self.records.values().map(|r| (r.id, r.position))
    }
}

impl Default for ParticipantStore {
    fn default() -> Self {
        Self::new()
    }
}
