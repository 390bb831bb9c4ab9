pub mod participant;
pub mod scoring;
pub mod selection;
pub mod spatial;

pub use participant::{ParticipantId, ParticipantRecord, ParticipantUpdate};
pub use selection::{sample_fanout, PeerSelection, SelectionEngine};
pub use spatial::{QuadTree, QuadTreeStats, Rect};

/// Engine errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),
    #[error("Position outside the world: id={0}, x={1}, y={2}")]
    OutOfWorld(ParticipantId, f64, f64),
    #[error("NaN or Infinity in sample for participant {0}")]
    InvalidSample(ParticipantId),
}
