//! The self-play engine: worker pools, job submission, and trajectory
//! retrieval.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::context::SearchContext;
use super::worker::{cpu_worker, gpu_worker, CpuMessage, WorkerShared};
use crate::core::{EngineError, GameRng, Result};
use crate::game::Game;
use crate::games;
use crate::mcts::{EngineConfig, Job, StatsSnapshot};
use crate::nn::ModelManager;

/// Runs self-play games on a pool of CPU workers (tree search) and GPU
/// workers (batched inference).
///
/// ```no_run
/// use std::sync::Arc;
/// use rust_vlzero::engine::Engine;
/// use rust_vlzero::mcts::EngineConfig;
/// use rust_vlzero::nn::{ModelManager, UniformPolicyZeroValue};
///
/// let models = ModelManager::from_model(Arc::new(UniformPolicyZeroValue::new(9, 2)), 1);
/// let mut engine = Engine::for_game(EngineConfig::default(), "tic_tac_toe", models)?;
/// engine.start(4, 1, Some(16))?;
/// let bytes = engine.get_trajectory();
/// engine.stop();
/// # Ok::<(), rust_vlzero::core::EngineError>(())
/// ```
pub struct Engine {
    shared: Arc<WorkerShared>,
    workers: Vec<JoinHandle<()>>,
    cpu_workers: usize,
}

impl Engine {
    pub fn new(config: EngineConfig, game: Arc<dyn Game>, models: ModelManager) -> Result<Self> {
        let ctx = SearchContext::new(config, game, models)?;
        Ok(Self {
            shared: Arc::new(WorkerShared::new(Arc::new(ctx))),
            workers: Vec::new(),
            cpu_workers: 0,
        })
    }

    /// Engine for a game from the registry.
    pub fn for_game(config: EngineConfig, game: &str, models: ModelManager) -> Result<Self> {
        Self::new(config, games::load(game)?, models)
    }

    #[inline]
    pub fn context(&self) -> &Arc<SearchContext> {
        &self.shared.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        self.shared.ctx.config()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Switch to another registered game. Fails while the engine runs or
    /// while Jobs for the current game still exist.
    pub fn load_game(&mut self, name: &str) -> Result<()> {
        let game = games::load(name)?;
        let busy = || EngineError::InvalidConfig {
            field: "game",
            message: "cannot change the game while jobs exist".to_string(),
        };
        if self.is_running() {
            return Err(busy());
        }
        let shared = Arc::get_mut(&mut self.shared).ok_or_else(busy)?;
        while shared.cpu_queue.try_pop().is_some() {}
        for queue in &shared.gpu_queues {
            while queue.try_pop().is_some() {}
        }
        let ctx = Arc::get_mut(&mut shared.ctx).ok_or_else(busy)?;
        ctx.set_game(game);
        log::info!("engine switched to game '{name}'");
        Ok(())
    }

    /// Load model weights for `version` on every device.
    pub fn load_model(&self, path: impl AsRef<Path>, version: usize) -> Result<()> {
        self.shared.ctx.models().load(path.as_ref(), version)
    }

    /// Spawn the worker threads and queue `num_envs` new games
    /// (default: two batches per GPU worker). With no GPU workers, CPU
    /// workers evaluate leaves themselves, one at a time. Does nothing if
    /// already running.
    pub fn start(&mut self, cpu_workers: usize, gpu_workers: usize, num_envs: Option<usize>) -> Result<()> {
        if self.is_running() {
            log::warn!("engine already running");
            return Ok(());
        }
        if cpu_workers == 0 {
            return Err(EngineError::InvalidConfig {
                field: "cpu_workers",
                message: "must be at least 1".to_string(),
            });
        }

        let config = self.shared.ctx.config();
        let num_envs = num_envs.unwrap_or(2 * config.batch_size * gpu_workers);
        let mut rng = match config.seed {
            Some(seed) => GameRng::new(seed),
            None => GameRng::from_entropy(),
        };

        self.shared
            .inline_evaluation
            .store(gpu_workers == 0, Ordering::Relaxed);
        self.shared.running.store(true, Ordering::Release);
        self.cpu_workers = cpu_workers;

        for i in 0..cpu_workers {
            let shared = Arc::clone(&self.shared);
            let worker_rng = rng.fork();
            let handle = thread::Builder::new()
                .name(format!("cpu-worker-{i}"))
                .spawn(move || cpu_worker(shared, worker_rng));
            self.track(handle)?;
        }
        for i in 0..gpu_workers {
            let shared = Arc::clone(&self.shared);
            let worker_rng = rng.fork();
            let handle = thread::Builder::new()
                .name(format!("gpu-worker-{i}"))
                .spawn(move || gpu_worker(shared, worker_rng));
            self.track(handle)?;
        }

        for _ in 0..num_envs {
            let job = Job::new(Arc::clone(&self.shared.ctx), None)?;
            self.shared.cpu_queue.push(CpuMessage::Run(Box::new(job)));
        }
        log::info!(
            "engine started: {cpu_workers} cpu workers, {gpu_workers} gpu workers, {num_envs} games, game '{}'",
            self.shared.ctx.game().name()
        );
        Ok(())
    }

    fn track(&mut self, handle: std::io::Result<JoinHandle<()>>) -> Result<()> {
        match handle {
            Ok(handle) => {
                self.workers.push(handle);
                Ok(())
            }
            Err(err) => {
                self.stop();
                Err(err.into())
            }
        }
    }

    /// Queue `count` Jobs searching one position (the initial position, or
    /// `serialized`). The first owns the tree and plays the moves; the rest
    /// are siblings adding simulations to the same tree.
    pub fn add_job(&self, count: usize, serialized: Option<&str>) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let owner = Job::new(Arc::clone(&self.shared.ctx), serialized)?;
        let siblings: Vec<Job> = (1..count).map(|_| owner.spawn_sibling()).collect();
        log::debug!("adding job {} with {} siblings", owner.id(), siblings.len());

        self.shared.cpu_queue.push(CpuMessage::Run(Box::new(owner)));
        self.shared
            .cpu_queue
            .push_all(siblings.into_iter().map(|job| CpuMessage::Run(Box::new(job))));
        Ok(())
    }

    /// Stop all workers once their current step completes, then unblock a
    /// pending [`get_trajectory`](Self::get_trajectory) with an empty value.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for _ in 0..self.cpu_workers {
            self.shared.cpu_queue.push(CpuMessage::Stop);
        }
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("{name} panicked");
            }
        }
        self.shared.ctx.trajectories().push(Vec::new());
        let stats = self.stats();
        log::info!(
            "engine stopped: {} simulations, {} trajectories, {} aborted jobs",
            stats.simulations,
            stats.trajectories,
            stats.aborted_jobs
        );
    }

    /// Block until a serialized [`Trajectory`](crate::training::Trajectory)
    /// is available. Returns an empty buffer after [`stop`](Self::stop).
    pub fn get_trajectory(&self) -> Vec<u8> {
        self.shared.ctx.trajectories().pop().unwrap_or_default()
    }

    /// Like [`get_trajectory`](Self::get_trajectory), waiting at most
    /// `timeout`.
    pub fn get_trajectory_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.shared.ctx.trajectories().pop_timeout(timeout)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.ctx.stats().snapshot()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("ctx", &self.shared.ctx)
            .field("running", &self.is_running())
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::UniformPolicyZeroValue;

    fn engine(config: EngineConfig) -> Engine {
        let models = ModelManager::from_model(Arc::new(UniformPolicyZeroValue::new(9, 2)), 1);
        Engine::for_game(config, "tic_tac_toe", models).unwrap()
    }

    #[test]
    fn test_unknown_game() {
        let models = ModelManager::from_model(Arc::new(UniformPolicyZeroValue::new(9, 2)), 1);
        let err = Engine::for_game(EngineConfig::default(), "go", models).unwrap_err();
        assert!(matches!(err, EngineError::UnknownGame { .. }));
    }

    #[test]
    fn test_start_requires_cpu_worker() {
        let mut engine = engine(EngineConfig::default());
        assert!(engine.start(0, 1, Some(0)).is_err());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_stop_unblocks_consumer() {
        let mut engine = engine(EngineConfig::default());
        engine.start(1, 0, Some(0)).unwrap();
        assert!(engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
        assert!(engine.get_trajectory().is_empty());

        // A second stop is a no-op
        engine.stop();
    }

    #[test]
    fn test_add_job_rejects_bad_position() {
        let engine = engine(EngineConfig::default());
        assert!(engine.add_job(2, Some("4 4")).is_err());
        assert!(engine.add_job(0, Some("4 4")).is_ok());
    }

    #[test]
    fn test_load_game_when_idle() {
        let mut engine = engine(EngineConfig::default());
        engine.add_job(1, None).unwrap();
        engine.load_game("tic_tac_toe").unwrap();
        assert!(engine.load_game("chess").is_err());
    }
}
