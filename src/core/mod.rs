//! Core engine types: players, RNG, errors.
//!
//! These are game-agnostic building blocks shared by every other module.

pub mod error;
pub mod player;
pub mod rng;

pub use error::{EngineError, Result};
pub use player::PlayerId;
pub use rng::GameRng;
