//! A live model plus its lifecycle state and the package directory it owns.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::MutexGuard;
use tracing::{info, warn};

use crate::model::Model;
use crate::package::{LoadedPackage, PackageDir};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus { Uploaded, Training, Trained, Failed }

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelStatus::Uploaded => "uploaded",
            ModelStatus::Training => "training",
            ModelStatus::Trained => "trained",
            ModelStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub entry: String,
    pub checksum: String,
    pub runtime: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub version: u64,
    pub status: ModelStatus,
    pub target: Option<String>,
    pub last_error: Option<String>,
    pub package: PackageInfo,
    pub uploaded_at: DateTime<Utc>,
    pub trained_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct State {
    status: ModelStatus,
    target: Option<String>,
    setup_done: bool,
    last_error: Option<String>,
    trained_at: Option<DateTime<Utc>>,
}

pub type ModelSlot = Option<Box<dyn Model>>;

pub struct ModelInstance {
    name: String,
    version: u64,
    package: PackageInfo,
    uploaded_at: DateTime<Utc>,
    state: RwLock<State>,
    /// Exclusive per-instance lock held for the whole of setup/fit/predict. Emptied on retire.
    model: tokio::sync::Mutex<ModelSlot>,
    dir: Mutex<Option<PackageDir>>,
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInstance").field("name", &self.name).field("version", &self.version).field("status", &self.status()).finish()
    }
}

impl ModelInstance {
    pub fn new(name: impl Into<String>, loaded: LoadedPackage) -> Self {
        let LoadedPackage { package, model } = loaded;
        let info = PackageInfo { entry: package.entry, checksum: package.checksum, runtime: model.kind(), size_bytes: package.size_bytes };
        Self {
            name: name.into(),
            version: 0,
            package: info,
            uploaded_at: Utc::now(),
            state: RwLock::new(State { status: ModelStatus::Uploaded, target: None, setup_done: false, last_error: None, trained_at: None }),
            model: tokio::sync::Mutex::new(Some(model)),
            dir: Mutex::new(Some(package.dir)),
        }
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self { self.version = version; self }

    pub fn name(&self) -> &str { &self.name }
    pub fn version(&self) -> u64 { self.version }
    pub fn package(&self) -> &PackageInfo { &self.package }
    pub fn status(&self) -> ModelStatus { self.state.read().status }
    pub fn target(&self) -> Option<String> { self.state.read().target.clone() }
    pub fn last_error(&self) -> Option<String> { self.state.read().last_error.clone() }
    pub fn workdir(&self) -> Option<PathBuf> { self.dir.lock().as_ref().map(|d| d.path().to_path_buf()) }
    pub fn is_retired(&self) -> bool { self.dir.lock().is_none() }

    pub fn summary(&self) -> ModelSummary {
        let st = self.state.read();
        ModelSummary {
            name: self.name.clone(),
            version: self.version,
            status: st.status,
            target: st.target.clone(),
            last_error: st.last_error.clone(),
            package: self.package.clone(),
            uploaded_at: self.uploaded_at,
            trained_at: st.trained_at,
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ModelSlot> { self.model.lock().await }

    pub(crate) fn setup_done(&self) -> bool { self.state.read().setup_done }
    pub(crate) fn mark_setup_done(&self) { self.state.write().setup_done = true; }

    /// Trained state is dropped the moment a new fit starts.
    pub(crate) fn begin_training(&self) {
        let mut st = self.state.write();
        st.status = ModelStatus::Training;
        st.target = None;
    }

    pub(crate) fn mark_trained(&self, target: &str) {
        let mut st = self.state.write();
        st.status = ModelStatus::Trained;
        st.target = Some(target.to_string());
        st.last_error = None;
        st.trained_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&self, error: String) {
        let mut st = self.state.write();
        st.status = ModelStatus::Failed;
        st.target = None;
        st.last_error = Some(error);
    }

    /// Trained target, if predictions are currently allowed.
    pub(crate) fn trained_target(&self) -> Result<String, ModelStatus> {
        let st = self.state.read();
        match (st.status, &st.target) {
            (ModelStatus::Trained, Some(t)) => Ok(t.clone()),
            (status, _) => Err(status),
        }
    }

    /// Dispose: wait for the in-flight call, stop the model, delete the package directory.
    pub async fn retire(&self) {
        let mut slot = self.model.lock().await;
        if let Some(mut model) = slot.take() { model.shutdown().await; }
        drop(slot);
        let dir = self.dir.lock().take();
        if let Some(dir) = dir {
            let path = dir.path().to_path_buf();
            match dir.release() {
                Ok(()) => info!(model = %self.name, version = self.version, dir = %path.display(), "instance retired"),
                Err(e) => warn!(model = %self.name, error = %e, dir = %path.display(), "package dir removal failed"),
            }
        }
    }
}
