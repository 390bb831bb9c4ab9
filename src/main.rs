//! Gossip fan-out simulation
//!
//! Random-walks a population of participants around the world, feeds their
//! state into a `SelectionEngine` every round and Bernoulli-samples each
//! sender's fan-out, logging how many direct pushes the engine asks for.
//!
//! Knobs (environment or `.env`): `SIM_PARTICIPANTS`, `SIM_ROUNDS`, `SIM_SEED`,
//! plus every `FANOUT_*` engine setting.

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use peer_fanout::engine::sample_fanout;
use peer_fanout::{EngineConfig, ParticipantId, ParticipantUpdate, SelectionEngine};

/// Maximum walker speed (world units per round)
const MAX_SPEED: f64 = 12.0;

/// Per-round velocity jitter
const VELOCITY_JITTER: f64 = 2.0;

/// Chance per participant per round of leaving and rejoining elsewhere
const CHURN_PROBABILITY: f64 = 0.01;

/// Simulation settings
#[derive(Debug, Clone)]
struct SimConfig {
    participants: usize,
    rounds: usize,
    seed: u64,
}

impl SimConfig {
    fn load_or_default() -> Self {
        let mut config = Self {
            participants: 200,
            rounds: 30,
            seed: 42,
        };

        if let Ok(raw) = std::env::var("SIM_PARTICIPANTS") {
            match raw.parse::<usize>() {
                Ok(parsed) if parsed > 0 => config.participants = parsed,
                _ => warn!("Invalid SIM_PARTICIPANTS '{}', using default", raw),
            }
        }

        if let Ok(raw) = std::env::var("SIM_ROUNDS") {
            match raw.parse::<usize>() {
                Ok(parsed) => config.rounds = parsed,
                Err(_) => warn!("Invalid SIM_ROUNDS '{}', using default", raw),
            }
        }

        if let Ok(raw) = std::env::var("SIM_SEED") {
            match raw.parse::<u64>() {
                Ok(parsed) => config.seed = parsed,
                Err(_) => warn!("Invalid SIM_SEED '{}', using default", raw),
            }
        }

        config
    }
}

/// Locally simulated participant state
#[derive(Debug, Clone, Copy)]
struct Walker {
    id: ParticipantId,
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
}

impl Walker {
    fn spawn(id: ParticipantId, world_size: f64, rng: &mut StdRng) -> Self {
        Self {
            id,
            x: rng.gen_range(0.0..world_size),
            y: rng.gen_range(0.0..world_size),
            vx: rng.gen_range(-MAX_SPEED..MAX_SPEED),
            vy: rng.gen_range(-MAX_SPEED..MAX_SPEED),
        }
    }

    /// Advance one round, bouncing off the world edges
    fn step(&mut self, world_size: f64, rng: &mut StdRng) {
        self.vx = (self.vx + rng.gen_range(-VELOCITY_JITTER..VELOCITY_JITTER)).clamp(-MAX_SPEED, MAX_SPEED);
        self.vy = (self.vy + rng.gen_range(-VELOCITY_JITTER..VELOCITY_JITTER)).clamp(-MAX_SPEED, MAX_SPEED);
        self.x += self.vx;
        self.y += self.vy;

        // Callers own clamping into [0, world_size)
        let upper = world_size - world_size * f64::EPSILON * 4.0;
        if self.x < 0.0 || self.x >= world_size {
            self.vx = -self.vx;
            self.x = self.x.clamp(0.0, upper);
        }
        if self.y < 0.0 || self.y >= world_size {
            self.vy = -self.vy;
            self.y = self.y.clamp(0.0, upper);
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Peer fan-out simulator v{}", env!("CARGO_PKG_VERSION"));

    let sim = SimConfig::load_or_default();
    let engine_config = EngineConfig::load_or_default();
    let world_size = engine_config.world_size;
    info!(
        "Configuration loaded: participants={}, rounds={}, seed={}, horizon={:.1}, strategy={:?}",
        sim.participants,
        sim.rounds,
        sim.seed,
        engine_config.causal_horizon(),
        engine_config.index_strategy
    );

    let mut engine = SelectionEngine::new(engine_config).context("invalid engine configuration")?;
    let mut rng = StdRng::seed_from_u64(sim.seed);

    let mut walkers: Vec<Walker> = (0..sim.participants as ParticipantId)
        .map(|id| Walker::spawn(id, world_size, &mut rng))
        .collect();
    for walker in &walkers {
        engine
            .insert_participant(walker.id, walker.x, walker.y)
            .with_context(|| format!("failed to insert participant {}", walker.id))?;
    }

    for round in 1..=sim.rounds {
        for walker in walkers.iter_mut() {
            if rng.gen_bool(CHURN_PROBABILITY) {
                engine.remove_participant(walker.id);
                *walker = Walker::spawn(walker.id, world_size, &mut rng);
                engine.insert_participant(walker.id, walker.x, walker.y)?;
                continue;
            }

            walker.step(world_size, &mut rng);
            // Time scaling and latency come from the host's own estimators; jitter stands in here
            let tdf = 1.0 + rng.gen_range(-0.15..0.15);
            let latency = rng.gen_range(0.005..0.25);
            engine.update_participant(
                walker.id,
                ParticipantUpdate::new(walker.x, walker.y, walker.vx, walker.vy, tdf, latency),
            )?;
        }

        let mut pushes = 0usize;
        let mut expected = 0.0f64;
        let mut isolated = 0usize;
        for walker in &walkers {
            let selections = engine.select_peers(walker.id, walker.id)?;
            if selections.is_empty() {
                isolated += 1;
            }
            expected += selections.iter().map(|s| s.probability).sum::<f64>();
            pushes += sample_fanout(&selections, &mut rng).len();
        }

        let n = walkers.len().max(1) as f64;
        info!(
            "Round {}: avg fan-out {:.2} (expected {:.2}), {} senders with no peer in range",
            round,
            pushes as f64 / n,
            expected / n,
            isolated
        );
    }

    let stats = engine.index_stats();
    info!(
        "Index: {} points, {} leaves, {} internal, depth {}, largest leaf {}",
        stats.total_points, stats.leaf_nodes, stats.internal_nodes, stats.max_depth, stats.max_points_per_leaf
    );

    println!("{}", engine.metrics().to_prometheus());

    Ok(())
}
