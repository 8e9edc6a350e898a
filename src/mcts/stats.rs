//! Engine counters for diagnostics and tuning.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters updated by all workers.
#[derive(Debug, Default)]
pub struct EngineStats {
    simulations: AtomicU64,
    evaluations: AtomicU64,
    inference_batches: AtomicU64,
    proven_labels: AtomicU64,
    trajectories: AtomicU64,
    aborted_jobs: AtomicU64,
    yields: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One completed backup.
    pub fn record_simulation(&self) {
        self.simulations.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` positions scored by the model.
    pub fn record_evaluations(&self, count: usize) {
        self.evaluations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.inference_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// A node received a label it did not have before.
    pub fn record_proven(&self) {
        self.proven_labels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trajectory(&self) {
        self.trajectories.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.aborted_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// A Job gave its worker back while waiting on another thread.
    pub fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            simulations: self.simulations.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            inference_batches: self.inference_batches.load(Ordering::Relaxed),
            proven_labels: self.proven_labels.load(Ordering::Relaxed),
            trajectories: self.trajectories.load(Ordering::Relaxed),
            aborted_jobs: self.aborted_jobs.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`EngineStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Completed backups.
    pub simulations: u64,

    /// Positions scored by the model.
    pub evaluations: u64,

    /// Inference calls made by GPU workers.
    pub inference_batches: u64,

    /// Labels newly proven during backup.
    pub proven_labels: u64,

    /// Trajectories reported.
    pub trajectories: u64,

    /// Jobs dropped after an error.
    pub aborted_jobs: u64,

    /// Times a Job was re-enqueued instead of waiting.
    pub yields: u64,
}

impl StatsSnapshot {
    /// Average positions per inference call.
    #[must_use]
    pub fn mean_batch_size(&self) -> f64 {
        if self.inference_batches == 0 {
            0.0
        } else {
            self.evaluations as f64 / self.inference_batches as f64
        }
    }
}
