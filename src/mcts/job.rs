//! One self-play game driven as a resumable state machine.
//!
//! ```text
//! Select -> Evaluate | Update
//! Evaluate -> Update
//! Update -> Select | Play | Done
//! Play -> Report | Select
//! Report -> Select | Done
//! ```
//!
//! A worker calls [`Job::step`] until the Job needs inference, yields, or is
//! done. The Job keeps the selection path as child indices so it can be
//! parked in a queue between steps and resume on any thread.

use std::cmp::Reverse;
use std::sync::Arc;

use smallvec::SmallVec;

use super::config::EngineConfig;
use super::node::{Child, Label, Node};
use super::tree::Tree;
use crate::core::{EngineError, GameRng, PlayerId, Result};
use crate::engine::SearchContext;
use crate::game::{Action, State};
use crate::nn::EncodedState;
use crate::training::{Ply, Trajectory};

/// Next step a Job will run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    Select,
    Evaluate,
    Update,
    Play,
    Report,
    Done,
}

/// Outcome of running one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep driving the Job.
    Continue,
    /// Another thread holds something this Job waits for; re-enqueue it.
    Yield,
}

/// How the current simulation's leaf was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeafKind {
    /// Claimed for expansion; waits for a policy.
    Evaluated,
    Terminal,
    /// Every child is proven.
    Exhausted,
    /// Proven before this simulation arrived.
    Transposition,
}

#[derive(Clone, Copy, Debug)]
struct PathStep {
    /// Player who moved into the node.
    player_before: PlayerId,
    /// Player to move at the node.
    player_after: PlayerId,
    /// Index in the parent's children; `None` for the root.
    child: Option<usize>,
}

type SelectionPath = SmallVec<[PathStep; 16]>;

/// Resolve the nodes along `path`.
fn path_nodes<'a>(root: &'a Node, path: &[PathStep]) -> Result<Vec<&'a Node>> {
    let mut nodes = Vec::with_capacity(path.len());
    let mut node = root;
    for step in path {
        if let Some(index) = step.child {
            node = node
                .children()
                .get(index)
                .map(Child::node)
                .ok_or_else(|| EngineError::protocol("selection path leaves the tree"))?;
        }
        nodes.push(node);
    }
    Ok(nodes)
}

/// A self-play game plus the scratch data of its current simulation.
pub struct Job {
    id: u64,
    ctx: Arc<SearchContext>,
    tree: Tree,
    tree_owner: bool,
    next_step: Step,
    root_state: Box<dyn State>,
    leaf_state: Option<Box<dyn State>>,
    leaf_observation: Vec<f32>,
    leaf_policy: Vec<f32>,
    leaf_returns: Vec<f32>,
    leaf_kind: LeafKind,
    path: SelectionPath,
    /// Virtual loss is applied along `path` and not yet backed up.
    backup_pending: bool,
    trajectory: Trajectory,
}

impl Job {
    /// New Job owning a fresh tree, rooted at the initial position or at
    /// `serialized` when given.
    pub fn new(ctx: Arc<SearchContext>, serialized: Option<&str>) -> Result<Self> {
        let root_state = match serialized {
            Some(text) if !text.trim().is_empty() => ctx.game().deserialize_state(text)?,
            _ => ctx.game().new_initial_state(),
        };
        let tree = Tree::new(root_state.fingerprint());
        Ok(Self {
            id: ctx.next_job_id(),
            ctx,
            tree,
            tree_owner: true,
            next_step: Step::Select,
            root_state,
            leaf_state: None,
            leaf_observation: Vec::new(),
            leaf_policy: Vec::new(),
            leaf_returns: Vec::new(),
            leaf_kind: LeafKind::Evaluated,
            path: SelectionPath::new(),
            backup_pending: false,
            trajectory: Trajectory::new(),
        })
    }

    /// A Job searching the same root in parallel. It shares this Job's tree,
    /// never plays a move, and is done once the budget is reached.
    pub fn spawn_sibling(&self) -> Self {
        Self {
            id: self.ctx.next_job_id(),
            ctx: Arc::clone(&self.ctx),
            tree: self.tree.clone(),
            tree_owner: false,
            next_step: Step::Select,
            root_state: self.root_state.clone(),
            leaf_state: None,
            leaf_observation: Vec::new(),
            leaf_policy: Vec::new(),
            leaf_returns: Vec::new(),
            leaf_kind: LeafKind::Evaluated,
            path: SelectionPath::new(),
            backup_pending: false,
            trajectory: Trajectory::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn next_step(&self) -> Step {
        self.next_step
    }

    #[inline]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    #[inline]
    pub fn is_tree_owner(&self) -> bool {
        self.tree_owner
    }

    #[inline]
    pub fn root_state(&self) -> &dyn State {
        self.root_state.as_ref()
    }

    /// Plies played so far in the current game.
    #[inline]
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Observation of the leaf waiting for evaluation.
    #[inline]
    pub fn leaf_observation(&self) -> &[f32] {
        &self.leaf_observation
    }

    /// Model version that evaluates this Job's leaves.
    pub fn model_version(&self) -> usize {
        self.root_state.current_player().index() % self.ctx.models().num_versions().max(1)
    }

    /// Run the pending step.
    pub fn step(&mut self, rng: &mut GameRng) -> Result<Flow> {
        match self.next_step {
            Step::Select => self.select(rng),
            Step::Evaluate => self.evaluate(),
            Step::Update => self.update(rng),
            Step::Play => self.play(rng),
            Step::Report => self.report(),
            Step::Done => Ok(Flow::Continue),
        }
    }

    fn after_search(&self) -> Step {
        if self.tree_owner {
            Step::Play
        } else {
            Step::Done
        }
    }

    /// Label `node`, recording a new label in the transposition table.
    fn prove(&self, node: &Node, label: Label) -> bool {
        if !node.set_label(label) {
            return false;
        }
        self.tree.store_tt(node.fingerprint(), label);
        self.ctx.stats().record_proven();
        true
    }

    fn revert_virtual_loss(&self, root: &Node) -> Result<()> {
        let virtual_loss = self.ctx.config().virtual_loss;
        for node in path_nodes(root, &self.path)? {
            node.remove_visits(virtual_loss);
        }
        Ok(())
    }

    /// Undo what the current simulation did to the shared tree: take back
    /// its virtual loss and reopen a leaf it claimed for expansion. Used
    /// when the Job is dropped before its backup.
    pub fn abandon(&mut self) {
        if !std::mem::take(&mut self.backup_pending) {
            return;
        }
        let root = Arc::clone(self.tree.root());
        let nodes = match path_nodes(&root, &self.path) {
            Ok(nodes) => nodes,
            Err(err) => {
                log::error!("job {}: cannot undo simulation: {err}", self.id);
                return;
            }
        };
        let virtual_loss = self.ctx.config().virtual_loss;
        for node in &nodes {
            node.remove_visits(virtual_loss);
        }
        if self.leaf_kind == LeafKind::Evaluated {
            if let Some(leaf) = nodes.last() {
                leaf.release_expand();
            }
        }
        self.leaf_state = None;
        self.leaf_policy.clear();
        self.next_step = Step::Select;
    }

    /// Walk from the root to a leaf, applying virtual loss on the way.
    ///
    /// Ends in `Evaluate` when this Job claimed an unexpanded leaf, in
    /// `Update` for terminal, proven, or exhausted leaves, and in
    /// `Play`/`Done` once the root itself is proven.
    pub fn select(&mut self, rng: &mut GameRng) -> Result<Flow> {
        let ctx = Arc::clone(&self.ctx);
        let config = ctx.config();
        let player_count = ctx.game().num_players();

        if self.root_state.is_terminal() {
            self.finish_game();
            return Ok(Flow::Continue);
        }

        let root = Arc::clone(self.tree.root());
        if let Label::Won(winner) = root.label() {
            self.leaf_returns = winner.win_returns(player_count);
            self.next_step = self.after_search();
            return Ok(Flow::Continue);
        }

        let mut state = self.root_state.clone();
        let mut previous = state.current_player();
        self.path.clear();
        self.path.push(PathStep {
            player_before: previous.opponent(),
            player_after: previous,
            child: None,
        });
        self.leaf_policy.clear();

        let mut node: &Node = &root;
        loop {
            node.add_visits(config.virtual_loss);
            let at_root = self.path.len() == 1;

            if !at_root {
                let label = match node.label() {
                    Label::Unknown => self.tree.lookup_tt(node.fingerprint()).unwrap_or_default(),
                    label => label,
                };
                if let Label::Won(winner) = label {
                    node.set_label(label);
                    self.leaf_returns = winner.win_returns(player_count);
                    self.leaf_kind = LeafKind::Transposition;
                    self.leaf_state = Some(state);
                    self.backup_pending = true;
                    self.next_step = Step::Update;
                    return Ok(Flow::Continue);
                }
            }

            if !node.is_expanded() {
                if state.is_terminal() {
                    self.prove(node, Label::from(state.winner()));
                    self.leaf_returns = state.returns();
                    self.leaf_kind = LeafKind::Terminal;
                    self.leaf_state = Some(state);
                    self.backup_pending = true;
                    self.next_step = Step::Update;
                    return Ok(Flow::Continue);
                }
                if node.acquire_expand() {
                    self.leaf_observation = state.observation_tensor();
                    self.leaf_kind = LeafKind::Evaluated;
                    self.leaf_state = Some(state);
                    self.backup_pending = true;
                    self.next_step = Step::Evaluate;
                    return Ok(Flow::Continue);
                }
                // A released gate leaves the node unexpanded; retry later.
                if !node.wait_expand(config.expand_spin_limit) || !node.is_expanded() {
                    self.revert_virtual_loss(&root)?;
                    ctx.stats().record_yield();
                    return Ok(Flow::Yield);
                }
            }

            match node.select(config.c_puct, config.float_error, rng) {
                Some(index) => {
                    let child = &node.children()[index];
                    state.apply_action(child.action());
                    let current = state.current_player();
                    self.path.push(PathStep {
                        player_before: previous,
                        player_after: current,
                        child: Some(index),
                    });
                    previous = current;
                    node = child.node();
                }
                None => {
                    let label = match node.label() {
                        Label::Unknown => node.label_from_children(state.current_player()),
                        label => label,
                    };
                    let Label::Won(winner) = label else {
                        self.revert_virtual_loss(&root)?;
                        return Err(EngineError::protocol(format!(
                            "node {:#x} has no selectable child and no label",
                            node.fingerprint()
                        )));
                    };
                    self.prove(node, label);
                    self.leaf_returns = winner.win_returns(player_count);
                    if at_root {
                        self.revert_virtual_loss(&root)?;
                        self.next_step = self.after_search();
                    } else {
                        self.leaf_kind = LeafKind::Exhausted;
                        self.leaf_state = Some(state);
                        self.backup_pending = true;
                        self.next_step = Step::Update;
                    }
                    return Ok(Flow::Continue);
                }
            }
        }
    }

    /// Score the pending leaf with the model directly (unbatched path).
    pub fn evaluate(&mut self) -> Result<Flow> {
        let game = self.ctx.game();
        let (_, model) = self.ctx.models().get(self.model_version())?;
        let batch = EncodedState::batch([self.leaf_observation.as_slice()], &game.observation_shape());
        let output = model.infer(&batch)?;
        if output.batch_size() != 1 {
            return Err(EngineError::inference(format!(
                "expected 1 result, got {}",
                output.batch_size()
            )));
        }
        self.ctx.stats().record_evaluations(1);
        let (policy, value) = (output.policy(0).to_vec(), output.value(0).to_vec());
        self.set_evaluation(policy, value)?;
        Ok(Flow::Continue)
    }

    /// Hand the model's policy and per-player value for the pending leaf to
    /// the Job and move on to `Update`.
    pub fn set_evaluation(&mut self, policy: Vec<f32>, returns: Vec<f32>) -> Result<()> {
        let game = self.ctx.game();
        if policy.len() != game.num_distinct_actions() || returns.len() != game.num_players() {
            return Err(EngineError::inference(format!(
                "expected {} policy / {} value entries, got {} / {}",
                game.num_distinct_actions(),
                game.num_players(),
                policy.len(),
                returns.len()
            )));
        }
        self.leaf_policy = policy;
        self.leaf_returns = returns;
        self.next_step = Step::Update;
        Ok(())
    }

    /// Back up the leaf returns, expand an evaluated leaf, and propagate
    /// proven labels toward the root.
    pub fn update(&mut self, rng: &mut GameRng) -> Result<Flow> {
        let ctx = Arc::clone(&self.ctx);
        let config = ctx.config();
        let root = Arc::clone(self.tree.root());
        let nodes = path_nodes(&root, &self.path)?;
        let (Some(&leaf), Some(&last)) = (nodes.last(), self.path.last()) else {
            return Err(EngineError::protocol("update without a selection path"));
        };
        if self.leaf_returns.len() < ctx.game().num_players() {
            return Err(EngineError::protocol("leaf returns are missing players"));
        }

        for (step, node) in self.path.iter().zip(&nodes) {
            node.remove_visits(config.virtual_loss - 1);
            node.add_values(
                self.leaf_returns[step.player_before.index()],
                self.leaf_returns[step.player_after.index()],
            );
        }
        self.backup_pending = false;
        ctx.stats().record_simulation();

        let mut sweep =
            matches!(self.leaf_kind, LeafKind::Terminal | LeafKind::Exhausted) && leaf.is_proven();

        if self.leaf_kind == LeafKind::Evaluated {
            let state = self
                .leaf_state
                .as_deref()
                .ok_or_else(|| EngineError::protocol("evaluated leaf without a state"))?;
            self.expand_leaf(leaf, state, nodes.len() == 1, rng)?;

            if self.prove(leaf, leaf.label_from_children(state.current_player())) {
                sweep = true;
            }
            if config.use_block_check
                && !leaf.is_proven()
                && last.player_before != last.player_after
                && !state.check_can_block()
                && self.prove(leaf, Label::Won(last.player_before))
            {
                sweep = true;
            }
        }

        if sweep {
            self.propagate(&nodes);
        }

        self.leaf_state = None;
        self.leaf_policy.clear();
        self.next_step = if self.tree.num_simulations() >= config.max_simulations {
            self.after_search()
        } else {
            Step::Select
        };
        Ok(Flow::Continue)
    }

    /// Publish the children of an evaluated leaf with priors renormalized
    /// over the legal actions; children already in the table start proven.
    fn expand_leaf(&self, leaf: &Node, state: &dyn State, at_root: bool, rng: &mut GameRng) -> Result<()> {
        let config = self.ctx.config();
        let legal_actions = state.legal_actions();
        if legal_actions.is_empty() {
            // Open the gate so no waiter spins on a node that will never
            // get children.
            leaf.expand(Vec::new());
            return Err(EngineError::protocol(format!(
                "non-terminal state without legal actions: '{}'",
                state.serialize()
            )));
        }

        let prior_of = |action: Action| self.leaf_policy.get(action).copied().unwrap_or(0.0).max(0.0);
        let policy_sum: f32 = legal_actions.iter().map(|&a| prior_of(a)).sum();
        if policy_sum <= 0.0 {
            log::warn!("job {}: policy has no mass on legal actions, using uniform priors", self.id);
        }
        let uniform = 1.0 / legal_actions.len() as f32;

        let children = legal_actions
            .iter()
            .map(|&action| {
                let prior = if policy_sum > 0.0 {
                    prior_of(action) / policy_sum
                } else {
                    uniform
                };
                let mut next = state.clone_box();
                next.apply_action(action);
                let fingerprint = next.fingerprint();
                let label = self.tree.lookup_tt(fingerprint).unwrap_or_default();
                Child::new(action, prior, Node::with_label(fingerprint, label))
            })
            .collect();
        leaf.expand(children);

        if at_root && config.dirichlet_epsilon > 0.0 {
            self.tree
                .add_dirichlet_noise(config.dirichlet_alpha, config.dirichlet_epsilon, rng);
        }
        Ok(())
    }

    /// Push the leaf's label up the path. A parent takes a child's label
    /// when the child is a win for the parent's mover, or when every child
    /// of the parent carries that same label. Stops at the first ancestor
    /// left unproven.
    fn propagate(&self, nodes: &[&Node]) {
        for i in (0..nodes.len().saturating_sub(1)).rev() {
            let child_label = nodes[i + 1].label();
            let Label::Won(winner) = child_label else {
                break;
            };
            let node = nodes[i];
            if !node.is_proven() {
                let mover = self.path[i].player_after;
                if winner == mover || node.all_children_labeled(child_label) {
                    self.prove(node, child_label);
                }
            }
            if !node.is_proven() {
                break;
            }
        }
    }

    /// Wait for sole ownership of the tree, then play one or more moves.
    pub fn play(&mut self, rng: &mut GameRng) -> Result<Flow> {
        let ctx = Arc::clone(&self.ctx);
        let config = ctx.config();
        if !self.wait_sole_owner(config.expand_spin_limit) {
            ctx.stats().record_yield();
            return Ok(Flow::Yield);
        }

        let player = self.root_state.current_player();
        {
            let root = Arc::clone(self.tree.root());
            if root.children().is_empty() {
                return Err(EngineError::protocol("play reached an unexpanded root"));
            }
            if config.verbose {
                self.log_root_report(&root);
            }
            log::debug!(
                "job {}: ply {} for {} after {} simulations",
                self.id,
                self.trajectory.len(),
                player,
                root.visits()
            );

            let greedy = self.trajectory.len() >= config.temperature_drop;
            let mut node: &Node = &root;
            let mut first = true;
            // Replays the explored subtree while the same player keeps
            // moving, when enabled.
            while let Some(index) = self.choose_child(node, greedy || !first, rng) {
                self.record_ply(node, index, config);
                let child = &node.children()[index];
                self.root_state.apply_action(child.action());
                node = child.node();
                first = false;

                let keep_playing = config.play_until_turn_player
                    && self.root_state.current_player() == player
                    && !self.root_state.is_terminal()
                    && node.visits() > 1;
                if !keep_playing {
                    break;
                }
            }
        }

        let still_searching =
            config.mcts_until_turn_player && self.root_state.current_player() == player;
        if self.root_state.is_terminal() {
            self.trajectory.set_returns(self.root_state.returns());
            self.next_step = Step::Report;
        } else if !config.play_until_terminal && !still_searching {
            self.next_step = Step::Report;
        } else {
            self.tree.reset(self.root_state.fingerprint());
            self.next_step = Step::Select;
        }
        Ok(Flow::Continue)
    }

    fn wait_sole_owner(&self, spin_limit: u32) -> bool {
        for round in 0..spin_limit {
            if self.tree.is_sole_owner() {
                return true;
            }
            if round % 64 == 63 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        self.tree.is_sole_owner()
    }

    /// Child to play at `node`: a proven win for the mover if there is one
    /// (most visited first), otherwise the most visited child when
    /// `greedy`, otherwise a visit-proportional sample.
    fn choose_child(&self, node: &Node, greedy: bool, rng: &mut GameRng) -> Option<usize> {
        let children = node.children();
        if children.is_empty() {
            return None;
        }
        let mover = self.root_state.current_player();
        let most_visited = |filter: &dyn Fn(&Child) -> bool| {
            children
                .iter()
                .enumerate()
                .filter(|(_, c)| filter(*c))
                .max_by_key(|(i, c)| (c.node().visits(), Reverse(*i)))
                .map(|(i, _)| i)
        };

        if let Some(index) = most_visited(&|c| c.node().label() == Label::Won(mover)) {
            return Some(index);
        }
        if !greedy {
            let weights: Vec<f32> = children.iter().map(|c| c.node().visits() as f32).collect();
            if let Some(index) = rng.choose_weighted(&weights) {
                return Some(index);
            }
        }
        most_visited(&|_| true)
    }

    /// Visit distribution over the full action space.
    fn visit_policy(&self, node: &Node) -> Vec<f32> {
        let children = node.children();
        let mut policy = vec![0.0; self.ctx.game().num_distinct_actions()];
        let total: u32 = children.iter().map(|c| c.node().visits()).sum();
        for child in children {
            if let Some(p) = policy.get_mut(child.action()) {
                *p = if total > 0 {
                    child.node().visits() as f32 / total as f32
                } else {
                    1.0 / children.len() as f32
                };
            }
        }
        policy
    }

    fn record_ply(&mut self, node: &Node, index: usize, config: &EngineConfig) {
        let child = &node.children()[index];
        let mover = self.root_state.current_player();
        let value = match child.node().label() {
            Label::Won(winner) if winner == mover => 1.0,
            Label::Won(_) => -1.0,
            Label::Unknown if config.value_from_child => child.node().parent_player_value().unwrap_or(0.0),
            Label::Unknown => node.current_player_value().unwrap_or(0.0),
        };
        let ply = Ply {
            player: mover,
            action: child.action(),
            value,
            policy: self.visit_policy(node),
            observation: config
                .save_observation
                .then(|| self.root_state.observation_tensor()),
            serialized_state: config
                .report_serialize_string
                .then(|| self.root_state.serialize()),
        };
        self.trajectory.push(ply);
    }

    fn log_root_report(&self, root: &Node) {
        let game = self.ctx.game();
        let children = root.children();
        let total: u32 = children.iter().map(|c| c.node().visits()).sum::<u32>().max(1);
        let mut order: Vec<usize> = (0..children.len()).collect();
        order.sort_by_key(|&i| Reverse(children[i].node().visits()));

        log::info!(
            "job {}: {:>6} {:>10} {:>8} {:>8} {:>8} {:>8}",
            self.id,
            "id",
            "action",
            "prior",
            "visits",
            "share",
            "value"
        );
        for &i in order.iter().take(self.ctx.config().top_n_children) {
            let child = &children[i];
            log::info!(
                "job {}: {:>6} {:>10} {:>8.4} {:>8} {:>8.4} {:>8.4}",
                self.id,
                child.action(),
                game.action_to_string(child.action()),
                child.prior(),
                child.node().visits(),
                child.node().visits() as f32 / total as f32,
                child.node().parent_player_value().unwrap_or(0.0)
            );
        }
    }

    fn finish_game(&mut self) {
        if !self.trajectory.is_finished() {
            self.trajectory.set_returns(self.root_state.returns());
        }
        self.next_step = if self.tree_owner {
            Step::Report
        } else {
            Step::Done
        };
    }

    /// Publish the trajectory, then start a new game or finish.
    pub fn report(&mut self) -> Result<Flow> {
        let bytes = self.trajectory.to_bytes()?;
        self.ctx.trajectories().push(bytes);
        self.ctx.stats().record_trajectory();
        log::debug!(
            "job {}: reported {} plies (finished: {})",
            self.id,
            self.trajectory.len(),
            self.trajectory.is_finished()
        );

        if self.ctx.config().auto_reset_job {
            self.root_state = self.ctx.game().new_initial_state();
            self.tree.reset(self.root_state.fingerprint());
            self.trajectory.clear();
            self.next_step = Step::Select;
        } else {
            self.next_step = Step::Done;
        }
        Ok(Flow::Continue)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("next_step", &self.next_step)
            .field("tree_owner", &self.tree_owner)
            .field("plies", &self.trajectory.len())
            .finish()
    }
}
