//! Concrete games and the name registry used by `Engine::load_game`.

pub mod tic_tac_toe;

use std::sync::Arc;

use crate::core::{EngineError, Result};
use crate::game::Game;

pub use tic_tac_toe::{TicTacToe, TicTacToeState};

/// Names accepted by [`load`].
pub fn list() -> Vec<&'static str> {
    vec![TicTacToe::NAME]
}

/// Look up a game by registry name.
pub fn load(name: &str) -> Result<Arc<dyn Game>> {
    match name {
        TicTacToe::NAME => Ok(Arc::new(TicTacToe)),
        _ => Err(EngineError::UnknownGame { name: name.to_string() }),
    }
}
