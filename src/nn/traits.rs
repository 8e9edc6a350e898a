//! Inference traits and tensor containers.
//!
//! These define the boundary between the search engine and the model that
//! scores positions (typically a network living in Python via PyO3).

use serde::{Deserialize, Serialize};

use crate::core::{EngineError, Result};

/// Flat tensor plus its shape, used for both single observations and
/// batches (batch dimension first).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncodedState {
    /// Flattened tensor data (row-major order).
    pub tensor: Vec<f32>,

    /// Shape of the tensor (e.g., [batch, channels, height, width]).
    pub shape: Vec<usize>,
}

impl EncodedState {
    /// Create a new encoded state.
    pub fn new(tensor: Vec<f32>, shape: Vec<usize>) -> Self {
        debug_assert_eq!(
            tensor.len(),
            shape.iter().product::<usize>(),
            "Tensor length must match shape product"
        );
        Self { tensor, shape }
    }

    /// Zero-filled tensor with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Self {
            tensor: vec![0.0; size],
            shape,
        }
    }

    /// Stack observations of `example_shape` into one batch tensor.
    pub fn batch<'a, I>(examples: I, example_shape: &[usize]) -> Self
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut tensor = Vec::new();
        let mut count = 0;
        for example in examples {
            tensor.extend_from_slice(example);
            count += 1;
        }
        let mut shape = Vec::with_capacity(example_shape.len() + 1);
        shape.push(count);
        shape.extend_from_slice(example_shape);
        Self::new(tensor, shape)
    }

    /// Size of the leading (batch) dimension.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensor.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensor.is_empty()
    }
}

/// Batched model output: one policy row and one value row per example.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    policy: Vec<f32>,
    value: Vec<f32>,
    batch_size: usize,
}

impl ModelOutput {
    /// Wrap flat policy and value buffers for `batch_size` examples.
    ///
    /// Fails when either buffer does not split evenly into rows.
    pub fn new(policy: Vec<f32>, value: Vec<f32>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            if policy.is_empty() && value.is_empty() {
                return Ok(Self { policy, value, batch_size });
            }
            return Err(EngineError::inference("non-empty output for an empty batch"));
        }
        if policy.len() % batch_size != 0 || value.len() % batch_size != 0 {
            return Err(EngineError::inference(format!(
                "output of {} policy / {} value entries does not split into {} rows",
                policy.len(),
                value.len(),
                batch_size
            )));
        }
        Ok(Self { policy, value, batch_size })
    }

    /// Number of examples.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Policy row of example `index`.
    #[must_use]
    pub fn policy(&self, index: usize) -> &[f32] {
        let width = self.policy.len() / self.batch_size.max(1);
        &self.policy[index * width..(index + 1) * width]
    }

    /// Value row (one entry per player) of example `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> &[f32] {
        let width = self.value.len() / self.batch_size.max(1);
        &self.value[index * width..(index + 1) * width]
    }
}

/// Batched policy/value inference.
///
/// One call scores a whole batch; the engine never calls it per example on
/// the batched path.
pub trait InferenceModel: Send + Sync {
    /// Score `batch` (batch dimension first).
    fn infer(&self, batch: &EncodedState) -> Result<ModelOutput>;
}

/// Uniform policy and zero value for every example (baseline for testing).
#[derive(Clone, Debug, Default)]
pub struct UniformPolicyZeroValue {
    action_space_size: usize,
    player_count: usize,
}

impl UniformPolicyZeroValue {
    /// Create a new baseline model.
    pub fn new(action_space_size: usize, player_count: usize) -> Self {
        Self {
            action_space_size,
            player_count,
        }
    }
}

impl InferenceModel for UniformPolicyZeroValue {
    fn infer(&self, batch: &EncodedState) -> Result<ModelOutput> {
        let n = batch.batch_size();
        let prob = if self.action_space_size == 0 {
            0.0
        } else {
            1.0 / self.action_space_size as f32
        };
        ModelOutput::new(
            vec![prob; n * self.action_space_size],
            vec![0.0; n * self.player_count],
            n,
        )
    }
}
