//! Versioned, hot-swappable model handles.
//!
//! Each version keeps two buffers per device and an index naming the active
//! one. `load` writes the inactive buffer on every device and then flips the
//! index, so inference already running on the old handle finishes untouched.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::traits::InferenceModel;
use crate::core::{EngineError, Result};

/// Where a model instance runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

/// Builds a model instance from a file for one device.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path, device: Device) -> Result<Arc<dyn InferenceModel>>;
}

type Slot = RwLock<Option<Arc<dyn InferenceModel>>>;

struct DeviceModels {
    device: Device,
    /// `buffers[version][0|1]`
    buffers: Vec<[Slot; 2]>,
}

/// Maps a model version to the loaded handle on the next device in
/// round-robin order.
pub struct ModelManager {
    devices: Vec<DeviceModels>,
    active: Vec<AtomicUsize>,
    next_device: AtomicUsize,
    loader: Option<Arc<dyn ModelLoader>>,
    load_lock: Mutex<()>,
}

impl ModelManager {
    /// Create an empty manager for `num_versions` versions. No devices means
    /// a single CPU device.
    pub fn new(mut devices: Vec<Device>, num_versions: usize) -> Self {
        if devices.is_empty() {
            devices.push(Device::Cpu);
        }
        let devices = devices
            .into_iter()
            .map(|device| DeviceModels {
                device,
                buffers: (0..num_versions)
                    .map(|_| [RwLock::new(None), RwLock::new(None)])
                    .collect(),
            })
            .collect();
        Self {
            devices,
            active: (0..num_versions).map(|_| AtomicUsize::new(0)).collect(),
            next_device: AtomicUsize::new(0),
            loader: None,
            load_lock: Mutex::new(()),
        }
    }

    /// A CPU-only manager with `model` installed for every version.
    pub fn from_model(model: Arc<dyn InferenceModel>, num_versions: usize) -> Self {
        let manager = Self::new(vec![Device::Cpu], num_versions);
        for version in 0..num_versions {
            // Versions are in range by construction.
            let _ = manager.install(version, Arc::clone(&model));
        }
        manager
    }

    /// Use `loader` for path-based loads.
    pub fn with_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Number of model versions.
    #[must_use]
    pub fn num_versions(&self) -> usize {
        self.active.len()
    }

    /// Devices in round-robin order.
    pub fn devices(&self) -> impl Iterator<Item = Device> + '_ {
        self.devices.iter().map(|d| d.device)
    }

    fn check_version(&self, version: usize) -> Result<()> {
        if version >= self.num_versions() {
            return Err(EngineError::InvalidConfig {
                field: "version",
                message: format!("{version} out of range (have {})", self.num_versions()),
            });
        }
        Ok(())
    }

    /// Load the model at `path` on every device and make it the active
    /// handle for `version`.
    pub fn load(&self, path: &Path, version: usize) -> Result<()> {
        self.check_version(version)?;
        let loader = self.loader.as_ref().ok_or_else(|| EngineError::ModelLoad {
            path: path.to_path_buf(),
            message: "no model loader configured".to_string(),
        })?;

        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let inactive = 1 - self.active[version].load(Ordering::Acquire);
        for slot in &self.devices {
            let model = loader.load(path, slot.device)?;
            *slot.buffers[version][inactive]
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(model);
        }
        self.active[version].store(inactive, Ordering::Release);
        log::info!("loaded model version {version} from {}", path.display());
        Ok(())
    }

    /// Make an already-built model the active handle for `version` on every
    /// device.
    pub fn install(&self, version: usize, model: Arc<dyn InferenceModel>) -> Result<()> {
        self.check_version(version)?;
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let inactive = 1 - self.active[version].load(Ordering::Acquire);
        for slot in &self.devices {
            *slot.buffers[version][inactive]
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&model));
        }
        self.active[version].store(inactive, Ordering::Release);
        log::info!("installed model version {version}");
        Ok(())
    }

    /// Active handle for `version` on the next device.
    pub fn get(&self, version: usize) -> Result<(Device, Arc<dyn InferenceModel>)> {
        self.check_version(version)?;
        let index = self.next_device.fetch_add(1, Ordering::Relaxed) % self.devices.len();
        let slot = &self.devices[index];
        let active = self.active[version].load(Ordering::Acquire);
        let model = slot.buffers[version][active]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EngineError::ModelNotLoaded { version })?;
        Ok((slot.device, model))
    }

    /// Whether `version` has a usable handle.
    #[must_use]
    pub fn is_loaded(&self, version: usize) -> bool {
        self.get(version).is_ok()
    }
}

impl fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelManager")
            .field("devices", &self.devices().collect::<Vec<_>>())
            .field("num_versions", &self.num_versions())
            .finish()
    }
}
