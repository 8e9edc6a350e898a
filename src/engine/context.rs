//! State shared by every Job and worker of one engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::queue::Queue;
use crate::core::Result;
use crate::game::Game;
use crate::mcts::{EngineConfig, EngineStats};
use crate::nn::ModelManager;

/// Configuration, game, models, output queue, and counters.
pub struct SearchContext {
    config: EngineConfig,
    game: Arc<dyn Game>,
    models: ModelManager,
    trajectories: Queue<Vec<u8>>,
    stats: EngineStats,
    next_job_id: AtomicU64,
}

impl SearchContext {
    /// Validate `config` and bundle the shared pieces.
    pub fn new(config: EngineConfig, game: Arc<dyn Game>, models: ModelManager) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            game,
            models,
            trajectories: Queue::new(),
            stats: EngineStats::new(),
            next_job_id: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn game(&self) -> &dyn Game {
        self.game.as_ref()
    }

    #[inline]
    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    /// Serialized trajectories waiting for a consumer.
    #[inline]
    pub fn trajectories(&self) -> &Queue<Vec<u8>> {
        &self.trajectories
    }

    #[inline]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Swap the game. Only possible while nothing else holds the context.
    pub(crate) fn set_game(&mut self, game: Arc<dyn Game>) {
        self.game = game;
    }

    pub(crate) fn next_job_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchContext")
            .field("game", &self.game.name())
            .field("models", &self.models)
            .field("config", &self.config)
            .finish()
    }
}
