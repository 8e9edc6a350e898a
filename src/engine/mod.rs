//! Worker topology of the self-play engine.
//!
//! CPU workers pop Jobs from one shared queue and run tree work. A Job that
//! needs a model evaluation goes to the GPU queue of its model version,
//! where GPU workers gather batches, call the model once per batch, and send
//! every Job back to the CPU queue. Finished games come out of
//! [`Engine::get_trajectory`] as serialized
//! [`Trajectory`](crate::training::Trajectory) bytes.

mod context;
mod queue;
mod runtime;
mod worker;

pub use context::SearchContext;
pub use queue::Queue;
pub use runtime::Engine;
pub use worker::CpuMessage;
