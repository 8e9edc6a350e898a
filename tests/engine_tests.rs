//! End-to-end self-play through the threaded engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_vlzero::core::Result;
use rust_vlzero::engine::Engine;
use rust_vlzero::game::{Game, State};
use rust_vlzero::games::TicTacToe;
use rust_vlzero::mcts::EngineConfig;
use rust_vlzero::nn::{EncodedState, InferenceModel, ModelManager, ModelOutput, UniformPolicyZeroValue};
use rust_vlzero::training::Trajectory;

const TIMEOUT: Duration = Duration::from_secs(60);

/// Uniform model that counts evaluated positions.
#[derive(Default)]
struct CountingModel {
    positions: AtomicUsize,
}

impl InferenceModel for CountingModel {
    fn infer(&self, batch: &EncodedState) -> Result<ModelOutput> {
        self.positions.fetch_add(batch.batch_size(), Ordering::SeqCst);
        UniformPolicyZeroValue::new(9, 2).infer(batch)
    }
}

fn uniform_engine(config: EngineConfig) -> Engine {
    let models = ModelManager::from_model(Arc::new(UniformPolicyZeroValue::new(9, 2)), 1);
    Engine::for_game(config, "tic_tac_toe", models).unwrap()
}

/// Replay `trajectory` from `start` and check every ply was legal.
fn assert_legal_game(trajectory: &Trajectory, start: &str) {
    let mut state = TicTacToe.deserialize_state(start).unwrap();
    for ply in &trajectory.plies {
        assert_eq!(ply.player, state.current_player());
        assert!(state.legal_actions().contains(&ply.action), "illegal action {}", ply.action);
        assert_eq!(ply.policy.len(), 9);
        assert!((ply.policy.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert!((-1.0..=1.0).contains(&ply.value));
        state.apply_action(ply.action);
    }
    if trajectory.is_finished() {
        assert!(state.is_terminal());
        assert_eq!(trajectory.returns.as_deref(), Some(state.returns().as_slice()));
    }
}

#[test]
fn test_self_play_batched() {
    let config = EngineConfig::default()
        .with_max_simulations(50)
        .with_c_puct(1.0)
        .with_batch_size(1)
        .with_seed(3);
    let mut engine = uniform_engine(config);
    engine.start(2, 1, Some(2)).unwrap();

    for _ in 0..3 {
        let bytes = engine.get_trajectory_timeout(TIMEOUT).expect("no trajectory");
        let trajectory = Trajectory::from_bytes(&bytes).unwrap();
        assert!(trajectory.is_finished());
        assert!(trajectory.len() >= 5);
        assert_legal_game(&trajectory, "");
    }
    engine.stop();

    let stats = engine.stats();
    assert!(stats.trajectories >= 3);
    assert!(stats.inference_batches > 0);
    assert_eq!(stats.mean_batch_size(), 1.0);
    assert_eq!(stats.aborted_jobs, 0);
}

#[test]
fn test_stop_unblocks_consumer() {
    let mut engine = uniform_engine(EngineConfig::default().with_max_simulations(10));
    engine.start(1, 1, Some(1)).unwrap();
    engine.stop();

    // Anything reported before the stop comes first, then the empty marker.
    loop {
        let bytes = engine.get_trajectory_timeout(TIMEOUT).expect("consumer stayed blocked");
        if bytes.is_empty() {
            break;
        }
    }
}

#[test]
fn test_inline_evaluation_with_siblings() {
    let config = EngineConfig::default()
        .with_max_simulations(40)
        .with_auto_reset(false)
        .with_save_observation(true);
    let mut engine = uniform_engine(config);
    let start = "4 0";
    engine.add_job(3, Some(start)).unwrap();
    engine.start(2, 0, Some(0)).unwrap();

    let bytes = engine.get_trajectory_timeout(TIMEOUT).expect("no trajectory");
    let trajectory = Trajectory::from_bytes(&bytes).unwrap();
    assert!(trajectory.is_finished());
    assert_legal_game(&trajectory, start);

    let samples = trajectory.to_training_samples(&TicTacToe.observation_shape());
    assert_eq!(samples.len(), trajectory.len());
    assert_eq!(samples[0].state.len(), 36);

    engine.stop();
    assert_eq!(engine.stats().trajectories, 1);
}

#[test]
fn test_each_version_plays_its_side() {
    let first = Arc::new(CountingModel::default());
    let second = Arc::new(CountingModel::default());
    let models = ModelManager::new(vec![], 2);
    models.install(0, first.clone()).unwrap();
    models.install(1, second.clone()).unwrap();

    let config = EngineConfig::default()
        .with_max_simulations(20)
        .with_batch_size(4)
        .with_auto_reset(false);
    let mut engine = Engine::for_game(config, "tic_tac_toe", models).unwrap();
    engine.start(2, 1, Some(1)).unwrap();
    let bytes = engine.get_trajectory_timeout(TIMEOUT).expect("no trajectory");
    engine.stop();

    let trajectory = Trajectory::from_bytes(&bytes).unwrap();
    assert!(trajectory.len() >= 5);
    assert!(first.positions.load(Ordering::SeqCst) > 0);
    assert!(second.positions.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_missing_model_aborts_jobs() {
    let models = ModelManager::new(vec![], 1);
    let mut engine = Engine::for_game(EngineConfig::default(), "tic_tac_toe", models).unwrap();
    engine.start(1, 1, Some(2)).unwrap();

    let deadline = std::time::Instant::now() + TIMEOUT;
    while engine.stats().aborted_jobs < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    engine.stop();
    assert_eq!(engine.stats().aborted_jobs, 2);
    assert!(engine.get_trajectory().is_empty());
}
