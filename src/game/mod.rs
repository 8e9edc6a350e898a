//! Game capability interface.
//!
//! Games implement `Game` and `State` to plug into the search engine:
//! - Legal actions and transitions
//! - Win detection and returns
//! - Observation tensors and board symmetries
//! - Serialization and fingerprints
//!
//! Concrete games live in `crate::games`.

pub mod state;

pub use state::{Action, Game, State};
