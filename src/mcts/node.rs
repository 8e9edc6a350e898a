//! Search tree vertex with lock-free statistics.
//!
//! Every field a concurrent selector touches is atomic. Children are
//! published exactly once behind an expansion gate: the thread that wins
//! `acquire_expand` builds the list and publishes it with release ordering,
//! everyone else waits for `Expanded` before reading.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::OnceLock;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::PlayerId;
use crate::game::Action;

/// `f32` stored as bits in an `AtomicU32`.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self, ordering: Ordering) -> f32 {
        f32::from_bits(self.0.load(ordering))
    }

    #[inline]
    pub fn store(&self, value: f32, ordering: Ordering) {
        self.0.store(value.to_bits(), ordering);
    }

    /// Lock-free add; returns the previous value.
    #[inline]
    pub fn fetch_add(&self, delta: f32, ordering: Ordering) -> f32 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, ordering, Ordering::Relaxed)
            {
                Ok(previous) => return f32::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Exact game-theoretic value of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    #[default]
    Unknown,
    Won(PlayerId),
}

impl Label {
    const UNKNOWN_BITS: u8 = u8::MAX;

    /// Winner of a proven node.
    #[must_use]
    pub fn winner(self) -> Option<PlayerId> {
        match self {
            Label::Unknown => None,
            Label::Won(player) => Some(player),
        }
    }

    #[must_use]
    pub fn is_proven(self) -> bool {
        self != Label::Unknown
    }

    fn to_bits(self) -> u8 {
        match self {
            Label::Unknown => Self::UNKNOWN_BITS,
            Label::Won(player) => player.0,
        }
    }

    fn from_bits(bits: u8) -> Self {
        if bits == Self::UNKNOWN_BITS {
            Label::Unknown
        } else {
            Label::Won(PlayerId(bits))
        }
    }
}

impl From<Option<PlayerId>> for Label {
    fn from(winner: Option<PlayerId>) -> Self {
        winner.map_or(Label::Unknown, Label::Won)
    }
}

/// Expansion gate states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExpandState {
    Unexpanded = 0,
    Expanding = 1,
    Expanded = 2,
}

impl ExpandState {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => ExpandState::Unexpanded,
            1 => ExpandState::Expanding,
            _ => ExpandState::Expanded,
        }
    }
}

/// Edge from a node to one of its children.
#[derive(Debug)]
pub struct Child {
    action: Action,
    prior: AtomicF32,
    node: Node,
}

impl Child {
    pub fn new(action: Action, prior: f32, node: Node) -> Self {
        Self {
            action,
            prior: AtomicF32::new(prior),
            node,
        }
    }

    #[inline]
    pub fn action(&self) -> Action {
        self.action
    }

    #[inline]
    pub fn prior(&self) -> f32 {
        self.prior.load(Ordering::Relaxed)
    }

    pub fn set_prior(&self, prior: f32) {
        self.prior.store(prior, Ordering::Relaxed);
    }

    #[inline]
    pub fn node(&self) -> &Node {
        &self.node
    }
}

/// One decision point in the search tree.
///
/// `visits` counts completed backups plus outstanding virtual loss.
/// `parent_player_value_sum` accumulates returns from the perspective of the
/// player who moved into this node; `current_player_value_sum` from the
/// perspective of the player to move here.
#[derive(Debug)]
pub struct Node {
    visits: AtomicU32,
    parent_player_value_sum: AtomicF32,
    current_player_value_sum: AtomicF32,
    label: AtomicU8,
    expand_state: AtomicU8,
    fingerprint: u64,
    children: OnceLock<Vec<Child>>,
}

impl Node {
    /// Fresh, unvisited node for the position with `fingerprint`.
    pub fn new(fingerprint: u64) -> Self {
        Self::with_label(fingerprint, Label::Unknown)
    }

    /// Fresh node that starts out proven (transposition hit at expansion).
    pub fn with_label(fingerprint: u64, label: Label) -> Self {
        Self {
            visits: AtomicU32::new(0),
            parent_player_value_sum: AtomicF32::new(0.0),
            current_player_value_sum: AtomicF32::new(0.0),
            label: AtomicU8::new(label.to_bits()),
            expand_state: AtomicU8::new(ExpandState::Unexpanded as u8),
            fingerprint,
            children: OnceLock::new(),
        }
    }

    #[inline]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    #[inline]
    pub fn visits(&self) -> u32 {
        self.visits.load(Ordering::Acquire)
    }

    pub fn parent_player_value_sum(&self) -> f32 {
        self.parent_player_value_sum.load(Ordering::Acquire)
    }

    pub fn current_player_value_sum(&self) -> f32 {
        self.current_player_value_sum.load(Ordering::Acquire)
    }

    /// Mean value from the perspective of the player who moved into this
    /// node, or `None` if unvisited.
    pub fn parent_player_value(&self) -> Option<f32> {
        let visits = self.visits();
        (visits > 0).then(|| self.parent_player_value_sum() / visits as f32)
    }

    /// Mean value from the perspective of the player to move.
    pub fn current_player_value(&self) -> Option<f32> {
        let visits = self.visits();
        (visits > 0).then(|| self.current_player_value_sum() / visits as f32)
    }

    /// Apply virtual loss on entry.
    #[inline]
    pub fn add_visits(&self, amount: u32) {
        self.visits.fetch_add(amount, Ordering::AcqRel);
    }

    /// Take back visits previously added (virtual loss revert).
    #[inline]
    pub fn remove_visits(&self, amount: u32) {
        self.visits.fetch_sub(amount, Ordering::AcqRel);
    }

    /// Add one backup's returns to both accumulators.
    pub fn add_values(&self, parent_player: f32, current_player: f32) {
        self.parent_player_value_sum
            .fetch_add(parent_player, Ordering::AcqRel);
        self.current_player_value_sum
            .fetch_add(current_player, Ordering::AcqRel);
    }

    #[inline]
    pub fn label(&self) -> Label {
        Label::from_bits(self.label.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_proven(&self) -> bool {
        self.label().is_proven()
    }

    /// Prove this node. Labels are monotone: only an `Unknown` node can be
    /// labeled, so the first writer wins. Returns whether this call set it.
    pub fn set_label(&self, label: Label) -> bool {
        if !label.is_proven() {
            return false;
        }
        self.label
            .compare_exchange(
                Label::UNKNOWN_BITS,
                label.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[inline]
    pub fn expand_state(&self) -> ExpandState {
        ExpandState::from_bits(self.expand_state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_expanded(&self) -> bool {
        self.expand_state() == ExpandState::Expanded
    }

    /// Claim the right to expand. Exactly one caller gets `true`; callers
    /// that lose must not assume children exist yet.
    pub fn acquire_expand(&self) -> bool {
        self.expand_state
            .compare_exchange(
                ExpandState::Unexpanded as u8,
                ExpandState::Expanding as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish `children` and open the gate. Only the thread holding the
    /// gate calls this.
    pub fn expand(&self, children: Vec<Child>) {
        debug_assert_eq!(self.expand_state(), ExpandState::Expanding);
        if self.children.set(children).is_err() {
            log::error!("node {:#x} published children twice, keeping the first", self.fingerprint);
        }
        self.expand_state
            .store(ExpandState::Expanded as u8, Ordering::Release);
    }

    /// Give up a claimed gate without publishing children, so the next
    /// selector can claim it. Returns whether the gate was held.
    pub fn release_expand(&self) -> bool {
        self.expand_state
            .compare_exchange(
                ExpandState::Expanding as u8,
                ExpandState::Unexpanded as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Spin while another thread is expanding, for at most `spin_limit`
    /// rounds. Returns `false` if the expansion is still in progress. A
    /// `true` result does not imply children: the holder may have released
    /// the gate instead.
    pub fn wait_expand(&self, spin_limit: u32) -> bool {
        for round in 0..spin_limit {
            if self.expand_state() != ExpandState::Expanding {
                return true;
            }
            if round % 64 == 63 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        self.expand_state() != ExpandState::Expanding
    }

    /// Published children; empty until expanded.
    pub fn children(&self) -> &[Child] {
        if !self.is_expanded() {
            return &[];
        }
        self.children.get().map_or(&[], Vec::as_slice)
    }

    /// Pick the unproven child with the best PUCT score.
    ///
    /// Scores within `eps` of the best are ties, broken uniformly by
    /// reservoir sampling in a single pass. Returns `None` when the node
    /// itself is proven, when every child is proven, or when there are no
    /// children.
    pub fn select<R: Rng + ?Sized>(&self, c_puct: f32, eps: f32, rng: &mut R) -> Option<usize> {
        if self.is_proven() {
            return None;
        }
        let visits = self.visits();
        let default_q = if visits > 0 {
            self.current_player_value_sum() / visits as f32
        } else {
            0.0
        };
        let sqrt_visits = (visits as f32).sqrt();

        let mut best_score = f32::MIN;
        let mut selected = None;
        let mut candidates = 0u32;

        for (index, child) in self.children().iter().enumerate() {
            if child.node.is_proven() {
                continue;
            }
            let child_visits = child.node.visits();
            let q = if child_visits > 0 {
                child.node.parent_player_value_sum() / child_visits as f32
            } else {
                default_q
            };
            let u = c_puct * child.prior() * sqrt_visits / (1 + child_visits) as f32;
            let score = q + u;

            if selected.is_none() || score >= best_score + eps {
                candidates = 1;
                best_score = score;
                selected = Some(index);
            } else if score > best_score - eps {
                candidates += 1;
                if rng.gen_range(0..candidates) == 0 {
                    selected = Some(index);
                }
            }
        }
        selected
    }

    /// Label implied by the children for a node where `mover` is to move:
    /// any child won by the mover wins the node, and a node whose children
    /// are all won by the opponent is lost. `Unknown` otherwise.
    pub fn label_from_children(&self, mover: PlayerId) -> Label {
        let children = self.children();
        if children.is_empty() {
            return Label::Unknown;
        }
        let mut all_lost = true;
        for child in children {
            match child.node.label() {
                Label::Won(winner) if winner == mover => return Label::Won(mover),
                Label::Won(_) => {}
                Label::Unknown => all_lost = false,
            }
        }
        if all_lost {
            Label::Won(mover.opponent())
        } else {
            Label::Unknown
        }
    }

    /// Whether every child carries `label`.
    pub fn all_children_labeled(&self, label: Label) -> bool {
        let children = self.children();
        !children.is_empty() && children.iter().all(|c| c.node.label() == label)
    }

    /// Clear statistics, label, and children for reuse as a fresh node of
    /// the position with `fingerprint`.
    pub fn reset(&mut self, fingerprint: u64) {
        *self.visits.get_mut() = 0;
        self.parent_player_value_sum = AtomicF32::new(0.0);
        self.current_player_value_sum = AtomicF32::new(0.0);
        *self.label.get_mut() = Label::UNKNOWN_BITS;
        *self.expand_state.get_mut() = ExpandState::Unexpanded as u8;
        self.fingerprint = fingerprint;
        self.children.take();
    }
}
