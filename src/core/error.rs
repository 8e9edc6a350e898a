//! Error types for the search engine.
//!
//! Protocol violations are fatal for the Job that hit them: the CPU worker
//! logs the error and drops the Job before anything else is written to the
//! transposition table.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while searching, evaluating, or reporting.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A game collaborator broke its contract (e.g. a non-terminal state
    /// without legal actions).
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// A configuration value is out of range.
    #[error("invalid configuration value for '{field}': {message}")]
    InvalidConfig { field: &'static str, message: String },

    /// No model has been loaded for the requested version.
    #[error("no model loaded for version {version}")]
    ModelNotLoaded { version: usize },

    /// The model loader failed.
    #[error("failed to load model from {}: {message}", path.display())]
    ModelLoad { path: PathBuf, message: String },

    /// The inference collaborator failed or returned malformed output.
    #[error("inference failed: {message}")]
    Inference { message: String },

    /// A serialized state could not be parsed.
    #[error("cannot deserialize state '{input}': {message}")]
    Deserialize { input: String, message: String },

    /// No game registered under the given name.
    #[error("unknown game '{name}'")]
    UnknownGame { name: String },

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Trajectory encoding failed.
    #[error("trajectory serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

impl EngineError {
    /// Create a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation { message: message.into() }
    }

    /// Create an inference error.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference { message: message.into() }
    }

    /// Whether this error means a collaborator broke its contract.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}
