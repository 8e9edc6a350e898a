//! Trajectory bindings for Python.

use numpy::{PyArray1, PyArray2, PyArrayMethods};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::training::{Ply, TrainingSample, Trajectory};

/// Python wrapper for Ply.
#[pyclass(name = "Ply")]
#[derive(Clone)]
pub struct PyPly(pub Ply);

#[pymethods]
impl PyPly {
    /// Index of the player who moved.
    #[getter]
    fn player(&self) -> usize {
        self.0.player.index()
    }

    #[getter]
    fn action(&self) -> usize {
        self.0.action
    }

    /// Search value estimate for the mover.
    #[getter]
    fn value(&self) -> f32 {
        self.0.value
    }

    /// Visit-count policy as a numpy array.
    fn policy<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f32>> {
        PyArray1::from_slice_bound(py, &self.0.policy)
    }

    /// Root observation, if it was saved.
    fn observation<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyArray1<f32>>> {
        self.0
            .observation
            .as_ref()
            .map(|obs| PyArray1::from_slice_bound(py, obs))
    }

    #[getter]
    fn serialized_state(&self) -> Option<String> {
        self.0.serialized_state.clone()
    }

    fn __repr__(&self) -> String {
        format!(
            "Ply(player={}, action={}, value={:.3})",
            self.0.player.0, self.0.action, self.0.value
        )
    }
}

/// Python wrapper for Trajectory.
#[pyclass(name = "Trajectory")]
#[derive(Clone)]
pub struct PyTrajectory(pub Trajectory);

#[pymethods]
impl PyTrajectory {
    /// Decode bytes returned by `Engine.get_trajectory`.
    #[staticmethod]
    fn from_bytes(data: &[u8]) -> PyResult<Self> {
        Trajectory::from_bytes(data)
            .map(Self)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    #[getter]
    fn plies(&self) -> Vec<PyPly> {
        self.0.plies.iter().cloned().map(PyPly).collect()
    }

    /// Per-player returns, or `None` for an unfinished game.
    #[getter]
    fn returns(&self) -> Option<Vec<f32>> {
        self.0.returns.clone()
    }

    #[getter]
    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    fn actions(&self) -> Vec<usize> {
        self.0.actions()
    }

    fn __len__(&self) -> usize {
        self.0.len()
    }

    /// Training samples from plies with saved observations.
    fn to_training_samples(&self, observation_shape: Vec<usize>) -> Vec<PyTrainingSample> {
        self.0
            .to_training_samples(&observation_shape)
            .into_iter()
            .map(PyTrainingSample)
            .collect()
    }

    /// All samples as (observations [N, obs], policies [N, actions],
    /// values [N]) numpy arrays.
    fn to_numpy_batch<'py>(
        &self,
        py: Python<'py>,
        observation_shape: Vec<usize>,
    ) -> PyResult<(
        Bound<'py, PyArray2<f32>>,
        Bound<'py, PyArray2<f32>>,
        Bound<'py, PyArray1<f32>>,
    )> {
        let samples = self.0.to_training_samples(&observation_shape);
        let n = samples.len();
        let obs_dim: usize = observation_shape.iter().product();
        let policy_dim = samples.first().map_or(0, |s| s.policy.len());

        let mut observations = Vec::with_capacity(n * obs_dim);
        let mut policies = Vec::with_capacity(n * policy_dim);
        let mut values = Vec::with_capacity(n);
        for (i, sample) in samples.iter().enumerate() {
            if sample.state.len() != obs_dim || sample.policy.len() != policy_dim {
                return Err(PyValueError::new_err(format!("sample {i} has inconsistent dimensions")));
            }
            observations.extend_from_slice(&sample.state.tensor);
            policies.extend_from_slice(&sample.policy);
            values.push(sample.value);
        }

        let observations = PyArray1::from_vec_bound(py, observations)
            .reshape([n, obs_dim])
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let policies = PyArray1::from_vec_bound(py, policies)
            .reshape([n, policy_dim])
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok((observations, policies, PyArray1::from_vec_bound(py, values)))
    }

    fn __repr__(&self) -> String {
        format!(
            "Trajectory(plies={}, returns={:?})",
            self.0.len(),
            self.0.returns
        )
    }
}

/// Python wrapper for TrainingSample.
#[pyclass(name = "TrainingSample")]
#[derive(Clone)]
pub struct PyTrainingSample(pub TrainingSample);

#[pymethods]
impl PyTrainingSample {
    #[getter]
    fn value(&self) -> f32 {
        self.0.value
    }

    #[getter]
    fn player(&self) -> usize {
        self.0.player.index()
    }

    fn state_numpy<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f32>> {
        PyArray1::from_slice_bound(py, &self.0.state.tensor)
    }

    fn policy_numpy<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f32>> {
        PyArray1::from_slice_bound(py, &self.0.policy)
    }

    fn __repr__(&self) -> String {
        format!(
            "TrainingSample(player={}, value={:.2}, state_dim={})",
            self.0.player.0,
            self.0.value,
            self.0.state.len()
        )
    }
}
