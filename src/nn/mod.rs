//! Model integration for the search engine.
//!
//! ## Overview
//!
//! - **Tensors**: `EncodedState` (flat data plus shape), `ModelOutput`
//! - **Inference**: `InferenceModel`, one batched call per GPU batch
//! - **Baseline**: `UniformPolicyZeroValue` for testing
//! - **Handles**: `ModelManager` with per-device, per-version hot swap
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use rust_vlzero::nn::{EncodedState, ModelManager, UniformPolicyZeroValue};
//!
//! let models = ModelManager::from_model(Arc::new(UniformPolicyZeroValue::new(9, 2)), 1);
//! let (_device, model) = models.get(0).unwrap();
//! let output = model.infer(&EncodedState::zeros(vec![1, 4, 3, 3])).unwrap();
//! assert_eq!(output.policy(0).len(), 9);
//! ```

pub mod model_manager;
pub mod traits;

pub use model_manager::{Device, ModelLoader, ModelManager};
pub use traits::{EncodedState, InferenceModel, ModelOutput, UniformPolicyZeroValue};
