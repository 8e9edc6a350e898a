//! Python bindings for the self-play engine.
//!
//! # Quick Start
//!
//! ```python
//! import rust_vlzero as vz
//!
//! def model(tensor, shape):
//!     batch = shape[0]
//!     return [1 / 9] * 9 * batch, [0.0] * 2 * batch
//!
//! config = vz.EngineConfig(max_simulations=200, batch_size=16)
//! engine = vz.Engine("tic_tac_toe", config, model)
//! engine.start(cpu_workers=4, gpu_workers=1)
//! trajectory = vz.Trajectory.from_bytes(engine.get_trajectory())
//! engine.stop()
//! ```

use pyo3::prelude::*;

mod py_engine;
mod py_nn;
mod py_training;

pub use py_engine::*;
pub use py_nn::*;
pub use py_training::*;

/// Names of the registered games.
#[pyfunction]
fn list_games() -> Vec<&'static str> {
    crate::games::list()
}

/// rust_vlzero: batched virtual-loss MCTS self-play.
#[pymodule]
fn rust_vlzero(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyEngineConfig>()?;
    m.add_class::<PyEngine>()?;

    m.add_class::<PyEncodedState>()?;
    m.add_class::<PyCallbackModel>()?;

    m.add_class::<PyPly>()?;
    m.add_class::<PyTrajectory>()?;
    m.add_class::<PyTrainingSample>()?;

    m.add_function(wrap_pyfunction!(list_games, m)?)?;
    Ok(())
}
