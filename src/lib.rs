//! # rust-vlzero
//!
//! Batched virtual-loss MCTS self-play for two-player, perfect-information
//! board games.
//!
//! ## Architecture
//!
//! - **Jobs**: each self-play game is a resumable state machine
//!   (`Select -> Evaluate -> Update -> Play -> Report`) that can park in a
//!   queue between steps and resume on any worker.
//!
//! - **Shared trees**: sibling Jobs search one root in parallel; virtual
//!   loss spreads them over different paths, and node statistics are plain
//!   atomics.
//!
//! - **Exact labels**: terminal wins are propagated up the tree as proven
//!   labels and cached in a transposition table next to the sampled
//!   statistics.
//!
//! - **Pipelined inference**: CPU workers do tree work; GPU workers gather
//!   leaves into batches and make one model call per batch.
//!
//! ## Modules
//!
//! - `core`: Players, RNG, errors
//! - `game`: `Game`/`State` capability traits
//! - `games`: Tic-Tac-Toe and the game registry
//! - `nn`: Tensors, the inference trait, model versions and devices
//! - `mcts`: Configuration, nodes, trees, Jobs, counters
//! - `engine`: Queues, workers, and the `Engine`
//! - `training`: Trajectories and training samples

pub mod core;
pub mod engine;
pub mod game;
pub mod games;
pub mod mcts;
pub mod nn;
pub mod training;

#[cfg(feature = "python")]
pub mod python;

// Re-export commonly used types
pub use crate::core::{EngineError, GameRng, PlayerId, Result};

pub use crate::game::{Action, Game, State};

pub use crate::games::{TicTacToe, TicTacToeState};

pub use crate::nn::{
    Device, EncodedState, InferenceModel, ModelLoader, ModelManager, ModelOutput,
    UniformPolicyZeroValue,
};

pub use crate::mcts::{
    EngineConfig, EngineStats, Flow, Job, Label, Node, StatsSnapshot, Step,
    TranspositionTable, Tree,
};

pub use crate::engine::{Engine, SearchContext};

pub use crate::training::{Ply, TrainingSample, Trajectory};
