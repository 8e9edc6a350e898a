//! Game and state capability traits.
//!
//! Games implement `Game` (static properties, symmetries, parsing) and
//! `State` (one position). The search engine calls into these traits but
//! never interprets game-specific concepts directly.

use crate::core::{PlayerId, Result};

/// Index into a game's flat action space (`0..num_distinct_actions`).
pub type Action = usize;

/// One game position.
///
/// ## Implementation Notes
///
/// - `apply_action`: Must be deterministic; the engine replays actions on
///   scratch copies during expansion.
/// - `fingerprint`: Must identify the position exactly (including the side to
///   move), since proven labels are shared through it.
/// - `returns`: One entry per player, meaningful once `is_terminal`.
pub trait State: Send + Sync + std::fmt::Debug {
    /// Player to move.
    fn current_player(&self) -> PlayerId;

    /// Legal actions, in a stable enumeration order.
    fn legal_actions(&self) -> Vec<Action>;

    /// Play `action` in place.
    fn apply_action(&mut self, action: Action);

    /// Whether the game is over.
    fn is_terminal(&self) -> bool;

    /// Winner of a finished game; `None` while ongoing or on a draw.
    fn winner(&self) -> Option<PlayerId>;

    /// Per-player returns.
    fn returns(&self) -> Vec<f32>;

    /// Flattened observation tensor with the game's `observation_shape`.
    fn observation_tensor(&self) -> Vec<f32>;

    /// Boxed copy of this state.
    fn clone_box(&self) -> Box<dyn State>;

    /// Compact text form accepted by `Game::deserialize_state`.
    fn serialize(&self) -> String;

    /// Canonical board hash used as the transposition-table key.
    fn fingerprint(&self) -> u64;

    /// Whether the player to move can still stop the previous mover's
    /// threat. Games without such a lookahead keep the default.
    fn check_can_block(&self) -> bool {
        true
    }
}

impl Clone for Box<dyn State> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Static description of a game.
pub trait Game: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Number of players.
    fn num_players(&self) -> usize {
        PlayerId::COUNT
    }

    /// Size of the flat action space (policy vector length).
    fn num_distinct_actions(&self) -> usize;

    /// Shape of one observation tensor, without the batch dimension.
    fn observation_shape(&self) -> Vec<usize>;

    /// Starting position.
    fn new_initial_state(&self) -> Box<dyn State>;

    /// Parse a state produced by `State::serialize`.
    fn deserialize_state(&self, input: &str) -> Result<Box<dyn State>>;

    /// Number of board symmetries (0 = none beyond identity).
    fn num_transformations(&self) -> usize {
        0
    }

    /// Apply symmetry `transformation` to an observation.
    fn transform_observation(&self, observation: &[f32], _transformation: usize) -> Vec<f32> {
        observation.to_vec()
    }

    /// Map a policy computed on a transformed observation back to the
    /// original orientation.
    fn restore_policy(&self, policy: &[f32], _transformation: usize) -> Vec<f32> {
        policy.to_vec()
    }

    /// Human-readable action.
    fn action_to_string(&self, action: Action) -> String {
        action.to_string()
    }

    /// Number of elements in one observation.
    fn observation_size(&self) -> usize {
        self.observation_shape().iter().product()
    }
}
