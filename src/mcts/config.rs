//! Engine-wide search configuration.

use serde::{Deserialize, Serialize};

use crate::core::{EngineError, Result};

/// Search and self-play parameters.
///
/// Built once and shared by every worker; nothing reads configuration from
/// global state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Simulation budget per ply (root visits before playing a move).
    pub max_simulations: u32,

    /// Target number of Jobs per inference batch.
    pub batch_size: usize,

    /// How long a GPU worker waits to fill a batch after its first Job.
    pub inference_wait_ms: u64,

    /// PUCT exploration constant.
    pub c_puct: f32,

    /// Dirichlet noise concentration.
    pub dirichlet_alpha: f32,

    /// Weight of the Dirichlet noise in the root priors.
    pub dirichlet_epsilon: f32,

    /// Scores closer than this are ties during selection.
    pub float_error: f32,

    /// Visits added to each node on the selection path until backup.
    pub virtual_loss: u32,

    /// Ply after which moves are chosen greedily instead of sampled.
    pub temperature_drop: usize,

    /// Board symmetries sampled per evaluation (0 = identity only).
    pub num_sampled_transformations: usize,

    /// Keep playing until the game ends instead of reporting after one ply.
    pub play_until_terminal: bool,

    /// Start a new game after reporting a trajectory.
    pub auto_reset_job: bool,

    /// Replay the explored subtree while the same player keeps moving.
    pub play_until_turn_player: bool,

    /// Keep searching while the same player keeps moving, even when
    /// `play_until_terminal` is off.
    pub mcts_until_turn_player: bool,

    /// Record ply values from the chosen child instead of the root.
    pub value_from_child: bool,

    /// Log the top root children before every move.
    pub verbose: bool,

    /// Rows in the verbose root report.
    pub top_n_children: usize,

    /// Store the root observation with every ply.
    pub save_observation: bool,

    /// Store the serialized root state with every ply.
    pub report_serialize_string: bool,

    /// Prove a leaf lost for the side to move when it cannot block.
    pub use_block_check: bool,

    /// Spin rounds before a Job waiting on another thread gives up its
    /// worker and is re-enqueued.
    pub expand_spin_limit: u32,

    /// Seed for worker RNGs (`None` = OS entropy).
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_simulations: 800,
            batch_size: 8,
            inference_wait_ms: 1,
            c_puct: 1.25,
            dirichlet_alpha: 0.3,
            dirichlet_epsilon: 0.25,
            float_error: 1e-3,
            virtual_loss: 3,
            temperature_drop: usize::MAX,
            num_sampled_transformations: 0,
            play_until_terminal: true,
            auto_reset_job: true,
            play_until_turn_player: false,
            mcts_until_turn_player: false,
            value_from_child: false,
            verbose: false,
            top_n_children: 10,
            save_observation: false,
            report_serialize_string: false,
            use_block_check: false,
            expand_spin_limit: 4096,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_simulations(mut self, simulations: u32) -> Self {
        self.max_simulations = simulations;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_c_puct(mut self, c_puct: f32) -> Self {
        self.c_puct = c_puct;
        self
    }

    pub fn with_dirichlet(mut self, alpha: f32, epsilon: f32) -> Self {
        self.dirichlet_alpha = alpha;
        self.dirichlet_epsilon = epsilon;
        self
    }

    pub fn with_virtual_loss(mut self, virtual_loss: u32) -> Self {
        self.virtual_loss = virtual_loss;
        self
    }

    pub fn with_temperature_drop(mut self, ply: usize) -> Self {
        self.temperature_drop = ply;
        self
    }

    pub fn with_sampled_transformations(mut self, count: usize) -> Self {
        self.num_sampled_transformations = count;
        self
    }

    pub fn with_auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset_job = auto_reset;
        self
    }

    pub fn with_play_until_terminal(mut self, enabled: bool) -> Self {
        self.play_until_terminal = enabled;
        self
    }

    pub fn with_block_check(mut self, enabled: bool) -> Self {
        self.use_block_check = enabled;
        self
    }

    pub fn with_save_observation(mut self, enabled: bool) -> Self {
        self.save_observation = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &'static str, message: &str) -> Result<()> {
            Err(EngineError::InvalidConfig {
                field,
                message: message.to_string(),
            })
        }

        if self.max_simulations == 0 {
            return invalid("max_simulations", "must be at least 1");
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "must be at least 1");
        }
        if self.virtual_loss == 0 {
            return invalid("virtual_loss", "must be at least 1");
        }
        if !(self.c_puct.is_finite() && self.c_puct >= 0.0) {
            return invalid("c_puct", "must be finite and non-negative");
        }
        if !(0.0..=1.0).contains(&self.dirichlet_epsilon) {
            return invalid("dirichlet_epsilon", "must be within [0, 1]");
        }
        if self.dirichlet_epsilon > 0.0 && !(self.dirichlet_alpha > 0.0) {
            return invalid("dirichlet_alpha", "must be positive when noise is enabled");
        }
        if !(self.float_error >= 0.0) {
            return invalid("float_error", "must be non-negative");
        }
        if self.expand_spin_limit == 0 {
            return invalid("expand_spin_limit", "must be at least 1");
        }
        Ok(())
    }
}
