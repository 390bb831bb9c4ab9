//! Peer Fan-out Selection Library
//!
//! Decides, for each `(sender, subject)` pair in a decentralized real-time
//! simulation, which peers should receive a direct state update and with what
//! probability.
//!
//! # Overview
//!
//! - [`engine::spatial`] - region quadtree over the square world for causal-horizon queries
//! - [`engine::scoring`] - latency, time-scaling, distance and closing-speed factors
//! - [`engine::selection`] - participant lifecycle and per-peer probability output
//! - [`config`] - engine constants with environment overrides
//! - [`metrics`] - Prometheus-format counters for hosts that export them
//!
//! The engine does not move data. Transport, discovery and time-scaling
//! estimation belong to the host.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod util;

pub use config::{EngineConfig, IndexStrategy};
pub use engine::{EngineError, ParticipantId, ParticipantRecord, ParticipantUpdate, PeerSelection, SelectionEngine};
