//! Package loader: zip archive -> validated manifest -> isolated directory -> inert model object.
//!
//! Entry manifest (`model.yaml`):
//!
//! ```yaml
//! runtime: builtin            # or: process
//! algorithm: linear_regression
//! features: [initial_price]
//! # process runtime:
//! # command: ["python3", "model.py"]
//! # capabilities: [setup, fit, predict]
//! ```

mod archive;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::builtin::{BuiltinCatalog, BuiltinSpec};
use crate::error::LoadError;
use crate::model::{Capability, Model};
use crate::process::ProcessModel;
use crate::rows::Options;

pub use archive::ENTRY_NAMES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind { Builtin, Process }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub params: Options,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        serde_yaml::from_str(text).map_err(|e| LoadError::Malformed(format!("entry manifest: {e}")))
    }

    /// Declared capabilities not covering {setup, fit, predict}.
    pub fn missing_capabilities(&self) -> Vec<Capability> {
        Capability::ALL.iter().copied().filter(|c| !self.capabilities.contains(c)).collect()
    }
}

/// Extraction directory owned by exactly one package. `release` removes it; `Drop` is a backstop.
#[derive(Debug)]
pub struct PackageDir {
    path: PathBuf,
    released: bool,
}

impl PackageDir {
    fn create(root: &Path, name: &str) -> std::io::Result<Self> {
        let safe: String = name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
        let path = root.join(format!("{safe}-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, released: false })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        match std::fs::remove_dir_all(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for PackageDir {
    fn drop(&mut self) {
        if !self.released { let _ = std::fs::remove_dir_all(&self.path); }
    }
}

#[derive(Debug)]
pub struct ModelPackage {
    pub name: String,
    /// Archive-relative path of the entry manifest.
    pub entry: String,
    /// Hex SHA-256 of the uploaded bytes.
    pub checksum: String,
    pub size_bytes: u64,
    pub manifest: Manifest,
    pub dir: PackageDir,
}

impl ModelPackage {
    /// Directory holding the entry manifest; process models run here.
    pub fn entry_dir(&self) -> PathBuf {
        match Path::new(&self.entry).parent() {
            Some(p) => self.dir.path().join(p),
            None => self.dir.path().to_path_buf(),
        }
    }
}

pub struct LoadedPackage {
    pub package: ModelPackage,
    pub model: Box<dyn Model>,
}

impl std::fmt::Debug for LoadedPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPackage").field("package", &self.package).field("model", &self.model.kind()).finish()
    }
}

enum Plan { Builtin(String, BuiltinSpec), Process(Vec<String>) }

#[derive(Clone)]
pub struct PackageLoader {
    root: PathBuf,
    max_bytes: u64,
    catalog: BuiltinCatalog,
}

impl PackageLoader {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self { root: root.into(), max_bytes, catalog: BuiltinCatalog::default() }
    }

    pub fn with_catalog(mut self, catalog: BuiltinCatalog) -> Self { self.catalog = catalog; self }

    pub fn root(&self) -> &Path { &self.root }

    /// Validate and materialize a package. Runs no user code.
    pub fn load(&self, name: &str, bytes: &[u8]) -> Result<LoadedPackage, LoadError> {
        if bytes.len() as u64 > self.max_bytes {
            return Err(LoadError::Malformed(format!("archive is {} bytes, limit {}", bytes.len(), self.max_bytes)));
        }
        let checksum = hex::encode(Sha256::digest(bytes));
        let mut zip = archive::open(bytes)?;
        let entry = archive::resolve_entry(&mut zip)?;
        let manifest = Manifest::parse(&archive::read_text(&mut zip, &entry, self.max_bytes)?)?;
        let plan = self.plan(&manifest)?;
        debug!(model = name, %entry, %checksum, "package validated");

        let dir = PackageDir::create(&self.root, name)?;
        let written = archive::extract(&mut zip, dir.path(), self.max_bytes)?;
        let package = ModelPackage { name: name.to_string(), entry, checksum, size_bytes: written, manifest, dir };
        let model: Box<dyn Model> = match plan {
            Plan::Builtin(algorithm, spec) => self.catalog.instantiate(&algorithm, spec)?,
            Plan::Process(command) => Box::new(ProcessModel::new(name, command, package.entry_dir())),
        };
        info!(model = name, kind = %model.kind(), dir = %package.dir.path().display(), bytes = written, "package loaded");
        Ok(LoadedPackage { package, model })
    }

    fn plan(&self, m: &Manifest) -> Result<Plan, LoadError> {
        match m.runtime {
            RuntimeKind::Builtin => {
                let algorithm = m.algorithm.clone().ok_or_else(|| LoadError::Malformed("builtin runtime needs `algorithm`".into()))?;
                if !self.catalog.contains(&algorithm) {
                    return Err(LoadError::Malformed(format!("unknown algorithm `{algorithm}` (known: {})", self.catalog.names().join(", "))));
                }
                Ok(Plan::Builtin(algorithm, BuiltinSpec { features: m.features.clone(), params: m.params.clone() }))
            }
            RuntimeKind::Process => {
                let missing = m.missing_capabilities();
                if !missing.is_empty() { return Err(LoadError::MissingCapability(missing)); }
                if m.command.first().map(|c| c.trim().is_empty()).unwrap_or(true) {
                    return Err(LoadError::Malformed("process runtime needs a non-empty `command`".into()));
                }
                Ok(Plan::Process(m.command.clone()))
            }
        }
    }
}
