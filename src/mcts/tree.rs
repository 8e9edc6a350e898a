//! Shared search tree and transposition table.
//!
//! A `Tree` is a cheap handle: clones share the root node, the table of
//! proven positions, and the noise counter. Sibling Jobs searching the same
//! position in parallel each hold one clone.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rand::Rng;
use rand_distr::{Distribution, Gamma};
use rustc_hash::FxHashMap;

use super::node::{Label, Node};

/// Proven labels keyed by board fingerprint.
///
/// Only exact labels are ever stored; statistics never go in here.
#[derive(Debug, Default)]
pub struct TranspositionTable {
    entries: RwLock<FxHashMap<u64, Label>>,
}

impl TranspositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label proven for `fingerprint`, if any.
    pub fn lookup(&self, fingerprint: u64) -> Option<Label> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fingerprint)
            .copied()
    }

    /// Record a proven label. Unknown labels are ignored and an existing
    /// entry is kept. Returns whether a new entry was added.
    pub fn store(&self, fingerprint: u64, label: Label) -> bool {
        if !label.is_proven() {
            return false;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&fingerprint) {
            return false;
        }
        entries.insert(fingerprint, label);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Root node plus transposition table.
#[derive(Clone, Debug)]
pub struct Tree {
    root: Arc<Node>,
    table: Arc<TranspositionTable>,
    noise_injections: Arc<AtomicUsize>,
}

impl Tree {
    /// Tree rooted at the position with `root_fingerprint`, with an empty
    /// table.
    pub fn new(root_fingerprint: u64) -> Self {
        Self::with_table(root_fingerprint, Arc::new(TranspositionTable::new()))
    }

    /// Tree sharing an existing table.
    pub fn with_table(root_fingerprint: u64, table: Arc<TranspositionTable>) -> Self {
        Self {
            root: Arc::new(Node::new(root_fingerprint)),
            table,
            noise_injections: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    #[inline]
    pub fn table(&self) -> &Arc<TranspositionTable> {
        &self.table
    }

    /// Root visit count (completed backups once no simulation is in flight).
    pub fn num_simulations(&self) -> u32 {
        self.root.visits()
    }

    /// Whether no other handle shares this root.
    pub fn is_sole_owner(&self) -> bool {
        Arc::strong_count(&self.root) == 1
    }

    pub fn lookup_tt(&self, fingerprint: u64) -> Option<Label> {
        self.table.lookup(fingerprint)
    }

    pub fn store_tt(&self, fingerprint: u64, label: Label) -> bool {
        self.table.store(fingerprint, label)
    }

    /// Mix Dirichlet(`alpha`) noise into the root priors at weight
    /// `epsilon`: `p <- p * (1 - epsilon) + noise * epsilon`.
    ///
    /// Skipped when the root has no children, `alpha` is not a valid Gamma
    /// shape, or the sampled noise sums to (numerically) zero. Returns
    /// whether noise was applied.
    pub fn add_dirichlet_noise<R: Rng + ?Sized>(&self, alpha: f32, epsilon: f32, rng: &mut R) -> bool {
        let children = self.root.children();
        if children.is_empty() {
            return false;
        }
        let gamma = match Gamma::new(alpha, 1.0) {
            Ok(gamma) => gamma,
            Err(err) => {
                log::warn!("skipping dirichlet noise: {err}");
                return false;
            }
        };

        let noise: Vec<f32> = children.iter().map(|_| gamma.sample(rng)).collect();
        let noise_sum: f32 = noise.iter().sum();
        if noise_sum < f32::MIN_POSITIVE {
            log::warn!("skipping dirichlet noise: sample sum {noise_sum} is zero");
            return false;
        }

        for (child, n) in children.iter().zip(&noise) {
            let mixed = child.prior() * (1.0 - epsilon) + n / noise_sum * epsilon;
            child.set_prior(mixed);
        }
        self.noise_injections.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Number of times noise has been applied to this tree's roots.
    pub fn noise_injections(&self) -> usize {
        self.noise_injections.load(Ordering::Relaxed)
    }

    /// Start a fresh root for the position with `root_fingerprint`. The root
    /// node is recycled in place when no other handle shares it. The table
    /// is kept: its labels are exact for any root.
    pub fn reset(&mut self, root_fingerprint: u64) {
        match Arc::get_mut(&mut self.root) {
            Some(root) => root.reset(root_fingerprint),
            None => self.root = Arc::new(Node::new(root_fingerprint)),
        }
    }
}
