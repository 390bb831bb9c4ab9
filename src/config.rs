use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deepest quadtree level accepted by `validate` (cell size would underflow usefulness past this)
const MAX_SUPPORTED_DEPTH: u8 = 24;

/// How the engine keeps its spatial index in step with the participant store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStrategy {
    /// Rebuild the whole tree from the store after every mutation. O(n) per update.
    Rebuild,
    /// Remove the participant's old entry and re-insert it. O(depth) per update.
    Incremental,
}

impl FromStr for IndexStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rebuild" => Ok(Self::Rebuild),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!("unknown index strategy '{}'", other)),
        }
    }
}

/// Selection engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Side length of the square world; coordinates live in `[0, world_size)`
    pub world_size: f64,
    /// Maximum quadtree depth. Also sets the cell size used for the causal horizon.
    pub max_depth: u8,
    /// Points a leaf holds before it subdivides
    pub node_capacity: usize,
    /// Causal horizon, in cells per time step
    pub n_cells: f64,
    /// Time step duration (seconds)
    pub delta_t: f64,
    /// Bandwidth of the time-scaling similarity kernel
    pub sigma: f64,
    /// Distance scale for the subject-to-peer distance term
    pub d0: f64,
    /// Speed scale for the closing-speed term
    pub v0: f64,
    /// Weight of the closing-speed bonus
    pub beta: f64,
    /// Exploration constant blended in as `epsilon / N`
    pub epsilon: f64,
    /// Floor applied to latency before inversion (seconds)
    pub latency_floor: f64,
    /// Index maintenance strategy
    pub index_strategy: IndexStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            world_size: 800.0,
            max_depth: 5,
            node_capacity: 4,
            n_cells: 2.0,
            delta_t: 1.0,
            sigma: 0.1,
            d0: 100.0,
            v0: 5.0,
            beta: 1.0,
            epsilon: 0.05,
            latency_floor: 0.001,
            index_strategy: IndexStrategy::Rebuild,
        }
    }
}

impl EngineConfig {
    /// Side length of the smallest cell the index can produce: `world_size / 2^max_depth`
    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.world_size / f64::from(1u32 << self.max_depth.min(MAX_SUPPORTED_DEPTH))
    }

    /// Radius of the causal horizon: `n_cells * cell_size * delta_t`
    #[inline]
    pub fn causal_horizon(&self) -> f64 {
        self.n_cells * self.cell_size() * self.delta_t
    }

    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        override_from_env("FANOUT_WORLD_SIZE", &mut config.world_size, |v| *v > 0.0);
        override_from_env("FANOUT_MAX_DEPTH", &mut config.max_depth, |v| *v <= MAX_SUPPORTED_DEPTH);
        override_from_env("FANOUT_NODE_CAPACITY", &mut config.node_capacity, |v| *v > 0);
        override_from_env("FANOUT_N_CELLS", &mut config.n_cells, |v| *v >= 0.0);
        override_from_env("FANOUT_DELTA_T", &mut config.delta_t, |v| *v > 0.0);
        override_from_env("FANOUT_SIGMA", &mut config.sigma, |v| *v > 0.0);
        override_from_env("FANOUT_D0", &mut config.d0, |v| *v > 0.0);
        override_from_env("FANOUT_V0", &mut config.v0, |v| *v > 0.0);
        override_from_env("FANOUT_BETA", &mut config.beta, |v| *v >= 0.0);
        override_from_env("FANOUT_EPSILON", &mut config.epsilon, |v| (0.0..=1.0).contains(v));
        override_from_env("FANOUT_LATENCY_FLOOR", &mut config.latency_floor, |v| *v > 0.0);
        override_from_env("FANOUT_INDEX_STRATEGY", &mut config.index_strategy, |_| true);

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !(self.world_size.is_finite() && self.world_size > 0.0) {
            return Err("world_size must be a positive number".to_string());
        }
        if self.max_depth > MAX_SUPPORTED_DEPTH {
            return Err(format!("max_depth cannot exceed {}", MAX_SUPPORTED_DEPTH));
        }
        if self.node_capacity == 0 {
            return Err("node_capacity must be at least 1".to_string());
        }
        if !(self.n_cells.is_finite() && self.n_cells >= 0.0) {
            return Err("n_cells cannot be negative".to_string());
        }
        if !(self.delta_t.is_finite() && self.delta_t > 0.0) {
            return Err("delta_t must be positive".to_string());
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err("sigma must be positive".to_string());
        }
        if !(self.d0.is_finite() && self.d0 > 0.0) {
            return Err("d0 must be positive".to_string());
        }
        if !(self.v0.is_finite() && self.v0 > 0.0) {
            return Err("v0 must be positive".to_string());
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return Err("beta cannot be negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err("epsilon must be within [0, 1]".to_string());
        }
        if !(self.latency_floor.is_finite() && self.latency_floor > 0.0) {
            return Err("latency_floor must be positive".to_string());
        }
        Ok(())
    }
}

/// Replace `target` with the parsed value of `key` if it is set, parses, and passes `accept`
fn override_from_env<T, F>(key: &str, target: &mut T, accept: F)
where
    T: FromStr,
    F: Fn(&T) -> bool,
{
    let Ok(raw) = std::env::var(key) else {
        return;
    };

    match raw.parse::<T>() {
        Ok(parsed) if accept(&parsed) => *target = parsed,
        Ok(_) => tracing::warn!("{} '{}' is out of range, using default", key, raw),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}
