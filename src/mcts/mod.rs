//! Virtual-loss Monte Carlo Tree Search with exact win/loss labels.
//!
//! ## Overview
//!
//! - **Node**: atomic visit and value accumulators, a monotone proven
//!   label, and a CAS expansion gate so exactly one thread builds children
//! - **Tree**: shared root plus a transposition table of proven labels
//! - **Job**: one self-play game as a state machine
//!   (`Select -> Evaluate -> Update -> Play -> Report`)
//! - **EngineConfig**: immutable search parameters
//! - **EngineStats**: counters shared by every worker
//!
//! Several Jobs may search one tree at once (leaf parallelism). Virtual loss
//! steers them onto different paths; labels proven anywhere are shared
//! through the transposition table and never revert.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use rust_vlzero::core::GameRng;
//! use rust_vlzero::engine::SearchContext;
//! use rust_vlzero::games::TicTacToe;
//! use rust_vlzero::mcts::{EngineConfig, Job, Step};
//! use rust_vlzero::nn::{ModelManager, UniformPolicyZeroValue};
//!
//! let config = EngineConfig::default().with_max_simulations(16);
//! let models = ModelManager::from_model(Arc::new(UniformPolicyZeroValue::new(9, 2)), 1);
//! let ctx = Arc::new(SearchContext::new(config, Arc::new(TicTacToe), models).unwrap());
//!
//! let mut job = Job::new(ctx, None).unwrap();
//! let mut rng = GameRng::new(0);
//! while job.next_step() != Step::Play {
//!     job.step(&mut rng).unwrap();
//! }
//! assert_eq!(job.tree().num_simulations(), 16);
//! ```

pub mod config;
pub mod job;
pub mod node;
pub mod stats;
pub mod tree;

pub use config::EngineConfig;
pub use job::{Flow, Job, Step};
pub use node::{AtomicF32, Child, ExpandState, Label, Node};
pub use stats::{EngineStats, StatsSnapshot};
pub use tree::{TranspositionTable, Tree};
