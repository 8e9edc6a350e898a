//! CPU and GPU worker loops.
//!
//! CPU workers drive Jobs through tree work until they need inference,
//! yield, or finish. GPU workers collect Jobs waiting for inference into
//! batches, make one model call per batch, and hand every Job back to the
//! CPU queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::context::SearchContext;
use super::queue::Queue;
use crate::core::{EngineError, GameRng, Result};
use crate::mcts::{Flow, Job, Step};
use crate::nn::EncodedState;

/// How long an idle GPU worker waits on one version queue before checking
/// the next one.
const GPU_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Message on the CPU queue.
#[derive(Debug)]
pub enum CpuMessage {
    Run(Box<Job>),
    /// Ends the worker that receives it.
    Stop,
}

/// Queues and flags shared by all workers of an engine.
#[derive(Debug)]
pub(crate) struct WorkerShared {
    pub(crate) ctx: Arc<SearchContext>,
    pub(crate) cpu_queue: Queue<CpuMessage>,
    /// One queue per model version.
    pub(crate) gpu_queues: Vec<Queue<Box<Job>>>,
    pub(crate) running: AtomicBool,
    /// Evaluate on the CPU worker when no GPU worker runs.
    pub(crate) inline_evaluation: AtomicBool,
}

impl WorkerShared {
    pub(crate) fn new(ctx: Arc<SearchContext>) -> Self {
        let versions = ctx.models().num_versions().max(1);
        Self {
            ctx,
            cpu_queue: Queue::new(),
            gpu_queues: (0..versions).map(|_| Queue::new()).collect(),
            running: AtomicBool::new(false),
            inline_evaluation: AtomicBool::new(false),
        }
    }

    /// Run `job` until it needs inference, yields, finishes, or fails. Once the
    /// engine stops, the Job is dropped at its next simulation boundary.
    fn drive(&self, mut job: Box<Job>, rng: &mut GameRng) {
        loop {
            match job.next_step() {
                Step::Done => {
                    log::trace!("job {} done", job.id());
                    return;
                }
                // Only between simulations, so nothing is left half backed up.
                Step::Select if !self.running.load(Ordering::Acquire) => {
                    log::trace!("job {} dropped at shutdown", job.id());
                    return;
                }
                Step::Evaluate if !self.inline_evaluation.load(Ordering::Relaxed) => {
                    let version = job.model_version();
                    match self.gpu_queues.get(version) {
                        Some(queue) => queue.push(job),
                        None => self.abort(&mut job, &EngineError::ModelNotLoaded { version }),
                    }
                    return;
                }
                _ => {}
            }
            match job.step(rng) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Yield) => {
                    self.cpu_queue.push(CpuMessage::Run(job));
                    return;
                }
                Err(err) => {
                    self.abort(&mut job, &err);
                    return;
                }
            }
        }
    }

    /// Drop `job` from the engine, leaving the shared tree as if its current
    /// simulation never started.
    fn abort(&self, job: &mut Job, err: &EngineError) {
        log::error!("job {} aborted at {:?}: {err}", job.id(), job.next_step());
        job.abandon();
        self.ctx.stats().record_abort();
    }

    /// Evaluate one batch of Jobs from the `version` queue and send them back
    /// to the CPU queue.
    fn run_batch(&self, version: usize, jobs: Vec<Box<Job>>, rng: &mut GameRng) {
        match self.infer_batch(version, &jobs, rng) {
            Ok(results) => {
                for (mut job, (policy, value)) in jobs.into_iter().zip(results) {
                    match job.set_evaluation(policy, value) {
                        Ok(()) => self.cpu_queue.push(CpuMessage::Run(job)),
                        Err(err) => self.abort(&mut job, &err),
                    }
                }
            }
            Err(err) => {
                log::error!("inference for model version {version} failed, dropping {} jobs: {err}", jobs.len());
                for mut job in jobs {
                    self.abort(&mut job, &err);
                }
            }
        }
    }

    /// One model call for all `jobs`, optionally over sampled board
    /// symmetries. Returns the averaged (policy, value) per Job.
    fn infer_batch(&self, version: usize, jobs: &[Box<Job>], rng: &mut GameRng) -> Result<Vec<(Vec<f32>, Vec<f32>)>> {
        let game = self.ctx.game();
        let config = self.ctx.config();
        let num_transformations = game.num_transformations();
        let sampled = config.num_sampled_transformations.min(num_transformations);

        // An empty list means the untransformed observation.
        let transformations: Vec<Vec<usize>> = jobs
            .iter()
            .map(|_| {
                if sampled == 0 {
                    Vec::new()
                } else {
                    rng.sample_indices(num_transformations, sampled)
                }
            })
            .collect();

        let mut tensor = Vec::new();
        let mut rows = 0;
        for (job, types) in jobs.iter().zip(&transformations) {
            if types.is_empty() {
                tensor.extend_from_slice(job.leaf_observation());
                rows += 1;
            }
            for &t in types {
                tensor.extend(game.transform_observation(job.leaf_observation(), t));
                rows += 1;
            }
        }
        let mut shape = vec![rows];
        shape.extend(game.observation_shape());
        if tensor.len() != shape.iter().product::<usize>() {
            return Err(EngineError::protocol(format!(
                "observations do not match shape {:?}",
                &shape[1..]
            )));
        }
        let batch = EncodedState::new(tensor, shape);

        let (device, model) = self.ctx.models().get(version)?;
        let output = model.infer(&batch)?;
        if output.batch_size() != rows {
            return Err(EngineError::inference(format!(
                "expected {rows} results, got {}",
                output.batch_size()
            )));
        }
        log::trace!("version {version} on {device}: {} jobs, {rows} rows", jobs.len());
        self.ctx.stats().record_batch();
        self.ctx.stats().record_evaluations(jobs.len());

        let mut row = 0;
        let results = transformations
            .iter()
            .map(|types| {
                if types.is_empty() {
                    let result = (output.policy(row).to_vec(), output.value(row).to_vec());
                    row += 1;
                    return result;
                }
                let mut policy = vec![0.0f32; game.num_distinct_actions()];
                let mut value = vec![0.0f32; output.value(row).len()];
                for &t in types {
                    let restored = game.restore_policy(output.policy(row), t);
                    for (sum, p) in policy.iter_mut().zip(restored) {
                        *sum += p;
                    }
                    for (sum, v) in value.iter_mut().zip(output.value(row)) {
                        *sum += v;
                    }
                    row += 1;
                }
                let count = types.len() as f32;
                policy.iter_mut().for_each(|p| *p /= count);
                value.iter_mut().for_each(|v| *v /= count);
                (policy, value)
            })
            .collect();
        Ok(results)
    }
}

/// CPU worker loop: runs until it receives `Stop`.
pub(crate) fn cpu_worker(shared: Arc<WorkerShared>, mut rng: GameRng) {
    while let Some(message) = shared.cpu_queue.pop() {
        match message {
            CpuMessage::Run(job) => shared.drive(job, &mut rng),
            CpuMessage::Stop => break,
        }
    }
    log::debug!("{} stopped", std::thread::current().name().unwrap_or("cpu worker"));
}

/// GPU worker loop: rotates over the version queues until the engine stops.
pub(crate) fn gpu_worker(shared: Arc<WorkerShared>, mut rng: GameRng) {
    let config = shared.ctx.config();
    let fill_wait = Duration::from_millis(config.inference_wait_ms);
    let versions = shared.gpu_queues.len();
    let mut toggle = 0;

    while shared.running.load(Ordering::Acquire) {
        let jobs = shared.gpu_queues[toggle].pop_batch(config.batch_size, GPU_POLL_INTERVAL, fill_wait);
        if !jobs.is_empty() {
            shared.run_batch(toggle, jobs, &mut rng);
        }
        toggle = (toggle + 1) % versions;
    }
    log::debug!("{} stopped", std::thread::current().name().unwrap_or("gpu worker"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::TicTacToe;
    use crate::mcts::{EngineConfig, ExpandState};
    use crate::nn::{InferenceModel, ModelManager, ModelOutput};
    use std::sync::Mutex;

    /// Records batch sizes and puts all policy mass on cell 0 of the
    /// (possibly transformed) board.
    #[derive(Default)]
    struct CornerModel {
        batches: Mutex<Vec<usize>>,
    }

    impl InferenceModel for CornerModel {
        fn infer(&self, batch: &EncodedState) -> Result<ModelOutput> {
            let n = batch.batch_size();
            self.batches.lock().unwrap().push(n);
            let mut policy = vec![0.0; n * 9];
            for row in 0..n {
                policy[row * 9] = 1.0;
            }
            ModelOutput::new(policy, vec![0.5; n * 2], n)
        }
    }

    fn shared_with(config: EngineConfig, model: Arc<CornerModel>) -> WorkerShared {
        let models = ModelManager::from_model(model, 1);
        let ctx = SearchContext::new(config, Arc::new(TicTacToe), models).unwrap();
        WorkerShared::new(Arc::new(ctx))
    }

    fn pending_job(shared: &WorkerShared, rng: &mut GameRng) -> Box<Job> {
        let mut job = Box::new(Job::new(Arc::clone(&shared.ctx), None).unwrap());
        job.step(rng).unwrap();
        assert_eq!(job.next_step(), Step::Evaluate);
        job
    }

    #[test]
    fn test_batch_returns_jobs_to_cpu_queue() {
        let model = Arc::new(CornerModel::default());
        let shared = shared_with(EngineConfig::default(), Arc::clone(&model));
        let mut rng = GameRng::new(1);
        let jobs = vec![pending_job(&shared, &mut rng), pending_job(&shared, &mut rng)];

        shared.run_batch(0, jobs, &mut rng);
        assert_eq!(*model.batches.lock().unwrap(), vec![2]);
        for _ in 0..2 {
            match shared.cpu_queue.try_pop() {
                Some(CpuMessage::Run(job)) => assert_eq!(job.next_step(), Step::Update),
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert_eq!(shared.ctx.stats().snapshot().inference_batches, 1);
    }

    #[test]
    fn test_symmetries_are_averaged() {
        let model = Arc::new(CornerModel::default());
        let config = EngineConfig::default().with_sampled_transformations(8);
        let shared = shared_with(config, Arc::clone(&model));
        let mut rng = GameRng::new(2);
        let jobs = vec![pending_job(&shared, &mut rng)];

        let results = shared.infer_batch(0, &jobs, &mut rng).unwrap();
        assert_eq!(*model.batches.lock().unwrap(), vec![8]);

        // Cell 0 maps onto each corner twice across the 8 symmetries.
        let (policy, value) = &results[0];
        for corner in [0, 2, 6, 8] {
            assert!((policy[corner] - 0.25).abs() < 1e-6, "corner {corner}: {policy:?}");
        }
        assert!((policy.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(value, &vec![0.5, 0.5]);
    }

    fn shared_without_model() -> WorkerShared {
        let models = ModelManager::new(vec![], 1);
        let ctx = SearchContext::new(EngineConfig::default(), Arc::new(TicTacToe), models).unwrap();
        WorkerShared::new(Arc::new(ctx))
    }

    #[test]
    fn test_failed_inference_drops_batch() {
        let shared = shared_without_model();
        let mut rng = GameRng::new(3);
        let jobs = vec![pending_job(&shared, &mut rng)];

        shared.run_batch(0, jobs, &mut rng);
        assert!(shared.cpu_queue.try_pop().is_none());
        assert_eq!(shared.ctx.stats().snapshot().aborted_jobs, 1);
    }

    #[test]
    fn test_aborted_job_leaves_shared_tree_clean() {
        let shared = shared_without_model();
        let mut rng = GameRng::new(5);
        let owner = pending_job(&shared, &mut rng);
        let mut sibling = Box::new(owner.spawn_sibling());
        let root = Arc::clone(owner.tree().root());
        assert_eq!(root.visits(), shared.ctx.config().virtual_loss);
        assert_eq!(root.expand_state(), ExpandState::Expanding);

        shared.run_batch(0, vec![owner], &mut rng);
        assert_eq!(root.visits(), 0);
        assert_eq!(root.expand_state(), ExpandState::Unexpanded);
        assert_eq!(shared.ctx.stats().snapshot().aborted_jobs, 1);

        // The sibling claims the reopened root instead of spinning on it.
        sibling.step(&mut rng).unwrap();
        assert_eq!(sibling.next_step(), Step::Evaluate);
        assert_eq!(root.expand_state(), ExpandState::Expanding);

        // Inline evaluation fails the same way through the drive loop.
        shared.running.store(true, Ordering::Relaxed);
        shared.inline_evaluation.store(true, Ordering::Relaxed);
        shared.drive(sibling, &mut rng);
        assert_eq!(root.visits(), 0);
        assert_eq!(root.expand_state(), ExpandState::Unexpanded);
        assert_eq!(shared.ctx.stats().snapshot().aborted_jobs, 2);
        assert!(shared.cpu_queue.try_pop().is_none());
    }

    #[test]
    fn test_inline_evaluation_plays_full_game() {
        let model = Arc::new(CornerModel::default());
        let config = EngineConfig::default()
            .with_max_simulations(4)
            .with_auto_reset(false);
        let shared = shared_with(config, model);
        shared.running.store(true, Ordering::Relaxed);
        shared.inline_evaluation.store(true, Ordering::Relaxed);
        let mut rng = GameRng::new(4);

        let job = Box::new(Job::new(Arc::clone(&shared.ctx), None).unwrap());
        shared.drive(job, &mut rng);

        assert_eq!(shared.ctx.stats().snapshot().trajectories, 1);
        assert!(shared.cpu_queue.try_pop().is_none());
        let bytes = shared.ctx.trajectories().try_pop().unwrap();
        let trajectory = crate::training::Trajectory::from_bytes(&bytes).unwrap();
        assert!(trajectory.is_finished());
        assert!(trajectory.len() >= 5);
    }
}
