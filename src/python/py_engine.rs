//! Engine bindings for Python.

use std::collections::HashMap;
use std::sync::Arc;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;

use crate::core::EngineError;
use crate::engine::Engine;
use crate::mcts::EngineConfig;
use crate::nn::{Device, ModelManager};

use super::py_nn::{PyCallbackModel, PyLoader};

fn to_py_err(err: EngineError) -> PyErr {
    match err {
        EngineError::InvalidConfig { .. } | EngineError::UnknownGame { .. } | EngineError::Deserialize { .. } => {
            PyValueError::new_err(err.to_string())
        }
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

/// Python wrapper for EngineConfig.
#[pyclass(name = "EngineConfig")]
#[derive(Clone)]
pub struct PyEngineConfig(pub EngineConfig);

#[pymethods]
impl PyEngineConfig {
    #[new]
    #[pyo3(signature = (
        max_simulations = 800,
        batch_size = 8,
        inference_wait_ms = 1,
        c_puct = 1.25,
        dirichlet_alpha = 0.3,
        dirichlet_epsilon = 0.25,
        virtual_loss = 3,
        temperature_drop = None,
        num_sampled_transformations = 0,
        play_until_terminal = true,
        auto_reset_job = true,
        value_from_child = false,
        verbose = false,
        save_observation = false,
        report_serialize_string = false,
        use_block_check = false,
        seed = None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        max_simulations: u32,
        batch_size: usize,
        inference_wait_ms: u64,
        c_puct: f32,
        dirichlet_alpha: f32,
        dirichlet_epsilon: f32,
        virtual_loss: u32,
        temperature_drop: Option<usize>,
        num_sampled_transformations: usize,
        play_until_terminal: bool,
        auto_reset_job: bool,
        value_from_child: bool,
        verbose: bool,
        save_observation: bool,
        report_serialize_string: bool,
        use_block_check: bool,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        let config = EngineConfig {
            max_simulations,
            batch_size,
            inference_wait_ms,
            c_puct,
            dirichlet_alpha,
            dirichlet_epsilon,
            virtual_loss,
            temperature_drop: temperature_drop.unwrap_or(usize::MAX),
            num_sampled_transformations,
            play_until_terminal,
            auto_reset_job,
            value_from_child,
            verbose,
            save_observation,
            report_serialize_string,
            use_block_check,
            seed,
            ..EngineConfig::default()
        };
        config.validate().map_err(to_py_err)?;
        Ok(Self(config))
    }

    #[getter]
    fn max_simulations(&self) -> u32 {
        self.0.max_simulations
    }

    #[getter]
    fn batch_size(&self) -> usize {
        self.0.batch_size
    }

    #[getter]
    fn c_puct(&self) -> f32 {
        self.0.c_puct
    }

    #[getter]
    fn virtual_loss(&self) -> u32 {
        self.0.virtual_loss
    }

    #[getter]
    fn seed(&self) -> Option<u64> {
        self.0.seed
    }

    fn __repr__(&self) -> String {
        format!(
            "EngineConfig(sims={}, batch={}, c_puct={}, vl={})",
            self.0.max_simulations, self.0.batch_size, self.0.c_puct, self.0.virtual_loss
        )
    }
}

/// Self-play engine driven from Python.
///
/// `model` is a callable `(tensor, shape) -> (policy, value)` installed for
/// every version; `loader` is a callable `(path, device) -> model` used by
/// `load_model`. Inference callbacks run on GPU worker threads and take the
/// GIL for the duration of the call.
#[pyclass(name = "Engine")]
pub struct PyEngine {
    inner: Engine,
}

#[pymethods]
impl PyEngine {
    #[new]
    #[pyo3(signature = (game, config = None, model = None, num_versions = 1, loader = None, num_gpus = 0))]
    fn new(
        game: &str,
        config: Option<PyEngineConfig>,
        model: Option<PyObject>,
        num_versions: usize,
        loader: Option<PyObject>,
        num_gpus: usize,
    ) -> PyResult<Self> {
        let devices = (0..num_gpus).map(Device::Cuda).collect();
        let mut models = ModelManager::new(devices, num_versions.max(1));
        if let Some(loader) = loader {
            models = models.with_loader(Arc::new(PyLoader::new(loader)));
        }
        if let Some(model) = model {
            let model = Arc::new(PyCallbackModel::from_callable(model));
            for version in 0..models.num_versions() {
                models.install(version, model.clone()).map_err(to_py_err)?;
            }
        }
        let config = config.map(|c| c.0).unwrap_or_default();
        let inner = Engine::for_game(config, game, models).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Replace the model callable for `version`.
    fn install_model(&self, version: usize, model: PyObject) -> PyResult<()> {
        self.inner
            .context()
            .models()
            .install(version, Arc::new(PyCallbackModel::from_callable(model)))
            .map_err(to_py_err)
    }

    /// Load a model for `version` through the engine's loader.
    fn load_model(&self, py: Python<'_>, path: String, version: usize) -> PyResult<()> {
        // The loader takes the GIL itself; release it so running workers
        // are not starved meanwhile.
        py.allow_threads(|| self.inner.load_model(&path, version))
            .map_err(to_py_err)
    }

    /// Switch to another registered game while stopped.
    fn load_game(&mut self, name: &str) -> PyResult<()> {
        self.inner.load_game(name).map_err(to_py_err)
    }

    #[pyo3(signature = (cpu_workers, gpu_workers = 1, num_envs = None))]
    fn start(&mut self, cpu_workers: usize, gpu_workers: usize, num_envs: Option<usize>) -> PyResult<()> {
        self.inner
            .start(cpu_workers, gpu_workers, num_envs)
            .map_err(to_py_err)
    }

    /// Queue `count` Jobs sharing one tree rooted at `serialized` (or the
    /// initial position).
    #[pyo3(signature = (count = 1, serialized = None))]
    fn add_job(&self, count: usize, serialized: Option<&str>) -> PyResult<()> {
        self.inner.add_job(count, serialized).map_err(to_py_err)
    }

    fn stop(&mut self, py: Python<'_>) {
        let inner = &mut self.inner;
        py.allow_threads(|| inner.stop());
    }

    #[getter]
    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Block until a trajectory is ready. Empty bytes after `stop()`.
    fn get_trajectory<'py>(&self, py: Python<'py>) -> Bound<'py, PyBytes> {
        let bytes = py.allow_threads(|| self.inner.get_trajectory());
        PyBytes::new_bound(py, &bytes)
    }

    /// Engine counters as a dict.
    fn stats(&self) -> HashMap<&'static str, f64> {
        let s = self.inner.stats();
        HashMap::from([
            ("simulations", s.simulations as f64),
            ("evaluations", s.evaluations as f64),
            ("inference_batches", s.inference_batches as f64),
            ("mean_batch_size", s.mean_batch_size()),
            ("proven_labels", s.proven_labels as f64),
            ("trajectories", s.trajectories as f64),
            ("aborted_jobs", s.aborted_jobs as f64),
            ("yields", s.yields as f64),
        ])
    }

    fn __repr__(&self) -> String {
        format!(
            "Engine(game='{}', running={})",
            self.inner.context().game().name(),
            self.inner.is_running()
        )
    }
}

impl Drop for PyEngine {
    fn drop(&mut self) {
        // Workers may be waiting on the GIL inside a model callback.
        let inner = &mut self.inner;
        Python::with_gil(|py| py.allow_threads(|| inner.stop()));
    }
}
