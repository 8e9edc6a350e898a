//! Self-play trajectories.
//!
//! A trajectory records one game from the searching Job's point of view:
//! - The action chosen at every ply and who chose it
//! - The visit-count policy over the full action space (policy target)
//! - The search's value estimate for the ply
//! - Final returns once the game is over (value targets)

use serde::{Deserialize, Serialize};

use crate::core::{PlayerId, Result};
use crate::game::Action;
use crate::nn::EncodedState;

/// One played move.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ply {
    /// Player who chose the action.
    pub player: PlayerId,

    /// The action that was played.
    pub action: Action,

    /// Search value estimate from the mover's perspective.
    pub value: f32,

    /// Visit-count distribution, one entry per distinct action.
    pub policy: Vec<f32>,

    /// Root observation tensor, when observations are saved.
    #[serde(default)]
    pub observation: Option<Vec<f32>>,

    /// Serialized root state, when requested.
    #[serde(default)]
    pub serialized_state: Option<String>,
}

/// A (possibly partial) game produced by self-play.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Plies in play order.
    pub plies: Vec<Ply>,

    /// Per-player returns; present only when the game reached a terminal
    /// state.
    pub returns: Option<Vec<f32>>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a ply.
    pub fn push(&mut self, ply: Ply) {
        self.plies.push(ply);
    }

    /// Record the final returns.
    pub fn set_returns(&mut self, returns: Vec<f32>) {
        self.returns = Some(returns);
    }

    /// Whether the game finished.
    pub fn is_finished(&self) -> bool {
        self.returns.is_some()
    }

    pub fn len(&self) -> usize {
        self.plies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plies.is_empty()
    }

    /// Drop all plies and returns.
    pub fn clear(&mut self) {
        self.plies.clear();
        self.returns = None;
    }

    /// Plies chosen by `player`.
    pub fn player_plies(&self, player: PlayerId) -> impl Iterator<Item = &Ply> {
        self.plies.iter().filter(move |p| p.player == player)
    }

    /// Actions in play order; replaying them reproduces the root states.
    pub fn actions(&self) -> Vec<Action> {
        self.plies.iter().map(|p| p.action).collect()
    }

    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode bytes produced by [`Trajectory::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Convert to training samples.
    ///
    /// Needs saved observations (plies without one are skipped) and final
    /// returns (an unfinished game yields no samples). The value target is
    /// the game's return for the ply's mover.
    pub fn to_training_samples(&self, observation_shape: &[usize]) -> Vec<TrainingSample> {
        let Some(returns) = &self.returns else {
            return Vec::new();
        };
        self.plies
            .iter()
            .filter_map(|ply| {
                let observation = ply.observation.as_ref()?;
                Some(TrainingSample {
                    state: EncodedState::new(observation.clone(), observation_shape.to_vec()),
                    policy: ply.policy.clone(),
                    value: returns.get(ply.player.index()).copied().unwrap_or(0.0),
                    player: ply.player,
                })
            })
            .collect()
    }
}

/// A single training sample extracted from a trajectory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingSample {
    /// Root observation.
    pub state: EncodedState,

    /// Target policy (visit distribution).
    pub policy: Vec<f32>,

    /// Target value (game outcome for the mover).
    pub value: f32,

    /// Player whose perspective this is from.
    pub player: PlayerId,
}
