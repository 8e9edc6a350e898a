//! Training data produced by self-play.
//!
//! ## Overview
//!
//! - **Trajectory**: every played ply with its search policy and value, plus
//!   the final returns
//! - **TrainingSample**: (observation, policy, value) targets extracted from
//!   a finished trajectory
//!
//! Trajectories travel through `Engine::get_trajectory` as bincode bytes;
//! decode them with `Trajectory::from_bytes`.

pub mod trajectory;

pub use trajectory::{Ply, Trajectory, TrainingSample};
