//! Tic-Tac-Toe reference game.
//!
//! A 3x3 board used to exercise the search engine end to end:
//! - Player 0 plays `O` and moves first, player 1 plays `X`
//! - Observation has 4 planes: O stones, X stones, empty cells, side to move
//! - The 8 symmetries of the square are exposed as transformations
//! - States serialize as their space-separated action history

mod game;

pub use game::{TicTacToe, TicTacToeState};
