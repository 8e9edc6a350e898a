//! Search behavior through the public Job API: shared trees, virtual loss,
//! transposition hits, exact labels, and root noise.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use rust_vlzero::core::{GameRng, PlayerId, Result};
use rust_vlzero::engine::SearchContext;
use rust_vlzero::game::{Game, State};
use rust_vlzero::games::TicTacToe;
use rust_vlzero::mcts::{Child, EngineConfig, Flow, Job, Label, Node, Step};
use rust_vlzero::nn::{EncodedState, InferenceModel, ModelManager, ModelOutput, UniformPolicyZeroValue};

/// Puts all policy mass on one action and counts calls.
struct OneHotModel {
    action: usize,
    calls: AtomicUsize,
}

impl OneHotModel {
    fn new(action: usize) -> Self {
        Self {
            action,
            calls: AtomicUsize::new(0),
        }
    }
}

impl InferenceModel for OneHotModel {
    fn infer(&self, batch: &EncodedState) -> Result<ModelOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = batch.batch_size();
        let mut policy = vec![0.0; n * 9];
        for row in 0..n {
            policy[row * 9 + self.action] = 1.0;
        }
        ModelOutput::new(policy, vec![0.0; n * 2], n)
    }
}

fn context(config: EngineConfig, model: Arc<dyn InferenceModel>) -> Arc<SearchContext> {
    let models = ModelManager::from_model(model, 1);
    Arc::new(SearchContext::new(config, Arc::new(TicTacToe), models).unwrap())
}

fn uniform_context(config: EngineConfig) -> Arc<SearchContext> {
    context(config, Arc::new(UniformPolicyZeroValue::new(9, 2)))
}

/// Step until the Job wants to play or is done.
fn search(job: &mut Job, rng: &mut GameRng) {
    while !matches!(job.next_step(), Step::Play | Step::Done) {
        // A yield only means another thread holds a node; retry.
        let _: Flow = job.step(rng).unwrap();
    }
}

#[test]
fn test_siblings_share_tree() {
    let ctx = uniform_context(EngineConfig::default().with_max_simulations(20));
    let owner = Job::new(Arc::clone(&ctx), None).unwrap();
    let sibling = owner.spawn_sibling();
    let root = Arc::clone(owner.tree().root());
    assert!(!sibling.is_tree_owner());

    let handles: Vec<_> = [owner, sibling]
        .into_iter()
        .enumerate()
        .map(|(i, mut job)| {
            thread::spawn(move || {
                let mut rng = GameRng::new(i as u64);
                search(&mut job, &mut rng);
                job.next_step()
            })
        })
        .collect();
    let steps: Vec<Step> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(steps, vec![Step::Play, Step::Done]);

    // No virtual loss is left behind: every root visit is a completed backup.
    let simulations = ctx.stats().snapshot().simulations;
    assert!(root.visits() >= 20);
    assert_eq!(u64::from(root.visits()), simulations);
    let child_visits: u32 = root.children().iter().map(|c| c.node().visits()).sum();
    assert_eq!(root.visits(), child_visits + 1);
}

#[test]
fn test_transposition_hit_skips_evaluation() {
    let model = Arc::new(OneHotModel::new(4));
    let config = EngineConfig::default().with_dirichlet(0.3, 0.0);
    let ctx = context(config, model.clone());
    let mut job = Job::new(Arc::clone(&ctx), None).unwrap();
    let mut rng = GameRng::new(0);

    // Expand the root.
    job.step(&mut rng).unwrap();
    assert_eq!(job.next_step(), Step::Evaluate);
    job.step(&mut rng).unwrap();
    job.step(&mut rng).unwrap();
    assert_eq!(job.next_step(), Step::Select);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    // The center move is known to win for the player who made it.
    let center = TicTacToe.deserialize_state("4").unwrap();
    let winner = PlayerId::new(0);
    assert!(job.tree().store_tt(center.fingerprint(), Label::Won(winner)));

    job.step(&mut rng).unwrap();
    assert_eq!(job.next_step(), Step::Update);
    job.step(&mut rng).unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    let root = job.tree().root();
    let child = root.children().iter().find(|c| c.action() == 4).unwrap();
    assert_eq!(child.node().label(), Label::Won(winner));
    assert_eq!(child.node().parent_player_value(), Some(1.0));
    // Transposition hits do not start a label sweep.
    assert!(!root.is_proven());
}

#[test]
fn test_forced_win_is_proven_at_root() {
    // O (player 0) holds 0 and 1 and is to move; 2 wins on the spot.
    let ctx = uniform_context(EngineConfig::default().with_max_simulations(200));
    let mut job = Job::new(Arc::clone(&ctx), Some("0 3 1 4")).unwrap();
    let mut rng = GameRng::new(5);
    search(&mut job, &mut rng);

    let root = job.tree().root();
    assert_eq!(root.label(), Label::Won(PlayerId::new(0)));
    assert!(job.tree().num_simulations() < 200);
    assert!(ctx.stats().snapshot().proven_labels >= 2);

    job.step(&mut rng).unwrap();
    assert_eq!(job.root_state().winner(), Some(PlayerId::new(0)));
    assert_eq!(job.trajectory().actions(), vec![2]);
    assert_eq!(job.trajectory().plies[0].value, 1.0);
}

#[test]
fn test_double_threat_is_lost_for_side_to_move() {
    // Player 0 holds 0, 2 and 4 and threatens both 6 and 8; every reply of
    // player 1 loses.
    let ctx = uniform_context(EngineConfig::default().with_max_simulations(400));
    let mut job = Job::new(Arc::clone(&ctx), Some("0 1 2 7 4")).unwrap();
    assert_eq!(job.root_state().current_player(), PlayerId::new(1));
    let mut rng = GameRng::new(11);
    search(&mut job, &mut rng);

    let winner = Label::Won(PlayerId::new(0));
    let root = job.tree().root();
    assert_eq!(root.label(), winner);
    assert_eq!(root.children().len(), 4);
    assert!(root.all_children_labeled(winner));
    assert!(job.tree().num_simulations() < 400);
}

#[test]
fn test_block_check_proves_fork_on_evaluation() {
    // Player 0 to move; the center creates a double threat.
    let config = EngineConfig::default()
        .with_dirichlet(0.3, 0.0)
        .with_max_simulations(100)
        .with_block_check(true);
    let model = Arc::new(OneHotModel::new(4));
    let ctx = context(config, model.clone());
    let mut job = Job::new(Arc::clone(&ctx), Some("0 1 2 7")).unwrap();
    let mut rng = GameRng::new(2);
    search(&mut job, &mut rng);

    let winner = Label::Won(PlayerId::new(0));
    let root = job.tree().root();
    let center = root.children().iter().find(|c| c.action() == 4).unwrap();
    assert_eq!(center.node().label(), winner);
    assert_eq!(center.node().visits(), 1);
    assert_eq!(root.label(), winner);
    // Root expansion plus the fork itself.
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(job.tree().num_simulations(), 2);

    // Without the check the same two simulations prove nothing.
    let config = EngineConfig::default()
        .with_dirichlet(0.3, 0.0)
        .with_max_simulations(2);
    let ctx = context(config, Arc::new(OneHotModel::new(4)));
    let mut job = Job::new(Arc::clone(&ctx), Some("0 1 2 7")).unwrap();
    search(&mut job, &mut rng);
    assert!(!job.tree().root().is_proven());
}

#[test]
fn test_proven_children_are_not_selected() {
    let node = Node::new(0);
    assert!(node.acquire_expand());
    let loss = Label::Won(PlayerId::new(1));
    node.expand(vec![
        Child::new(0, 0.5, Node::with_label(1, loss)),
        Child::new(1, 0.5, Node::with_label(2, loss)),
    ]);
    node.add_visits(2);

    let mut rng = GameRng::new(0);
    assert_eq!(node.select(1.25, 1e-3, &mut rng), None);
    assert_eq!(node.label_from_children(PlayerId::new(0)), loss);
    assert!(node.all_children_labeled(loss));
}

#[test]
fn test_noise_once_per_root() {
    let config = EngineConfig::default()
        .with_max_simulations(50)
        .with_auto_reset(false);
    let ctx = uniform_context(config);
    let mut job = Job::new(Arc::clone(&ctx), None).unwrap();
    let mut rng = GameRng::new(9);
    while job.next_step() != Step::Done {
        job.step(&mut rng).unwrap();
    }

    let trajectory = job.trajectory();
    assert!(trajectory.is_finished());
    assert_eq!(job.tree().noise_injections(), trajectory.len());
}

#[test]
fn test_terminal_start_reports_empty_game() {
    let ctx = uniform_context(EngineConfig::default().with_auto_reset(false));
    let mut job = Job::new(Arc::clone(&ctx), Some("0 3 1 4 2")).unwrap();
    let mut rng = GameRng::new(0);
    while job.next_step() != Step::Done {
        job.step(&mut rng).unwrap();
    }
    assert!(job.trajectory().is_empty());
    assert_eq!(job.trajectory().returns, Some(vec![1.0, -1.0]));
    assert!(ctx.trajectories().try_pop().is_some());
}

proptest! {
    #[test]
    fn test_labels_never_change_once_proven(ops in prop::collection::vec(prop::option::of(0u8..2), 1..20)) {
        let node = Node::new(0);
        let mut first: Option<Label> = None;
        for op in ops {
            let label = Label::from(op.map(PlayerId::new));
            let changed = node.set_label(label);
            if first.is_none() && label.is_proven() {
                prop_assert!(changed);
                first = Some(label);
            } else {
                prop_assert!(!changed);
            }
            prop_assert_eq!(node.label(), first.unwrap_or(Label::Unknown));
        }
    }
}
