//! Model bindings: Python callables as inference models and loaders.

use std::path::Path;
use std::sync::Arc;

use numpy::PyArray1;
use pyo3::prelude::*;

use crate::core::{EngineError, Result};
use crate::nn::{Device, EncodedState, InferenceModel, ModelLoader, ModelOutput};

/// Python wrapper for EncodedState.
#[pyclass(name = "EncodedState")]
#[derive(Clone, Debug)]
pub struct PyEncodedState(pub EncodedState);

#[pymethods]
impl PyEncodedState {
    #[new]
    fn new(tensor: Vec<f32>, shape: Vec<usize>) -> PyResult<Self> {
        if tensor.len() != shape.iter().product::<usize>() {
            return Err(pyo3::exceptions::PyValueError::new_err(format!(
                "{} values do not fit shape {shape:?}",
                tensor.len()
            )));
        }
        Ok(Self(EncodedState::new(tensor, shape)))
    }

    #[getter]
    fn shape(&self) -> Vec<usize> {
        self.0.shape.clone()
    }

    #[getter]
    fn batch_size(&self) -> usize {
        self.0.batch_size()
    }

    /// Flat tensor as a numpy array.
    fn to_numpy<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f32>> {
        PyArray1::from_slice_bound(py, &self.0.tensor)
    }

    fn __len__(&self) -> usize {
        self.0.len()
    }

    fn __repr__(&self) -> String {
        format!("EncodedState(shape={:?})", self.0.shape)
    }
}

/// A Python callable used as the engine's model.
///
/// The callable receives the flat batch tensor (numpy `float32`) and its
/// shape, and returns `(policy, value)`: flat sequences of
/// `batch * num_actions` and `batch * num_players` floats.
#[pyclass(name = "CallbackModel")]
#[derive(Debug)]
pub struct PyCallbackModel {
    callback: PyObject,
}

#[pymethods]
impl PyCallbackModel {
    #[new]
    fn new(callback: PyObject) -> Self {
        Self { callback }
    }

    /// Run the callable on a batch.
    fn infer(&self, py: Python<'_>, batch: &PyEncodedState) -> PyResult<(Vec<f32>, Vec<f32>)> {
        self.call(py, &batch.0)
    }
}

impl PyCallbackModel {
    pub fn from_callable(callback: PyObject) -> Self {
        Self::new(callback)
    }

    fn call(&self, py: Python<'_>, batch: &EncodedState) -> PyResult<(Vec<f32>, Vec<f32>)> {
        let tensor = PyArray1::from_slice_bound(py, &batch.tensor);
        self.callback
            .call1(py, (tensor, batch.shape.clone()))?
            .extract(py)
    }
}

impl InferenceModel for PyCallbackModel {
    fn infer(&self, batch: &EncodedState) -> Result<ModelOutput> {
        let (policy, value) = Python::with_gil(|py| self.call(py, batch))
            .map_err(|err| EngineError::inference(format!("python model failed: {err}")))?;
        ModelOutput::new(policy, value, batch.batch_size())
    }
}

/// A Python callable `loader(path, device) -> model callable` used by
/// `Engine.load_model`.
#[derive(Debug)]
pub(crate) struct PyLoader {
    callback: PyObject,
}

impl PyLoader {
    pub(crate) fn new(callback: PyObject) -> Self {
        Self { callback }
    }
}

impl ModelLoader for PyLoader {
    fn load(&self, path: &Path, device: Device) -> Result<Arc<dyn InferenceModel>> {
        let model = Python::with_gil(|py| {
            self.callback
                .call1(py, (path.to_string_lossy().into_owned(), device.to_string()))
        })
        .map_err(|err| EngineError::ModelLoad {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Ok(Arc::new(PyCallbackModel::from_callable(model)))
    }
}
