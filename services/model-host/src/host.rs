//! Process-wide host state: loader, registry, orchestrators and collaborators, started and
//! stopped explicitly and handed to whatever transport sits in front.

use modelhost_core::{HostConfig, HOST_METRICS};
use modelhost_resilience::Containment;
use opentelemetry::KeyValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analysis::{ColumnStatsAnalyzer, DataAnalyzer};
use crate::builtin::BuiltinCatalog;
use crate::datasource::{DataSource, DataSourceRef, MemorySource};
use crate::error::{LoadError, RuntimeError, RuntimeResult};
use crate::inference::{InferenceOrchestrator, PredictionRecord};
use crate::instance::{ModelInstance, ModelSummary};
use crate::package::PackageLoader;
use crate::registry::ModelRegistry;
use crate::rows::{Options, RowSet};
use crate::training::{TrainResult, TrainingOrchestrator};

const MAX_NAME_LEN: usize = 128;

pub struct HostBuilder {
    config: HostConfig,
    sources: Option<Arc<dyn DataSource>>,
    analyzer: Option<Arc<dyn DataAnalyzer>>,
    catalog: BuiltinCatalog,
}

impl HostBuilder {
    pub fn sources(mut self, sources: Arc<dyn DataSource>) -> Self { self.sources = Some(sources); self }
    pub fn analyzer(mut self, analyzer: Arc<dyn DataAnalyzer>) -> Self { self.analyzer = Some(analyzer); self }
    pub fn catalog(mut self, catalog: BuiltinCatalog) -> Self { self.catalog = catalog; self }

    pub async fn start(self) -> RuntimeResult<ModelHost> {
        let cfg = self.config;
        tokio::fs::create_dir_all(&cfg.packages_dir)
            .await
            .map_err(|e| RuntimeError::Host(format!("packages dir {}: {e}", cfg.packages_dir.display())))?;
        let sources = self.sources.unwrap_or_else(|| Arc::new(MemorySource::new()));
        let analyzer = self.analyzer.unwrap_or_else(|| Arc::new(ColumnStatsAnalyzer));
        let containment = Containment::new(cfg.max_concurrent_executions);
        let host = ModelHost {
            loader: PackageLoader::new(&cfg.packages_dir, cfg.max_package_bytes).with_catalog(self.catalog),
            registry: ModelRegistry::new(),
            training: TrainingOrchestrator::new(sources.clone(), analyzer, containment.clone(), cfg.fit_timeout()),
            inference: InferenceOrchestrator::new(sources, containment.clone(), cfg.predict_timeout()),
            containment,
            packages_dir: cfg.packages_dir.clone(),
        };
        info!(packages_dir = %cfg.packages_dir.display(), slots = host.containment.capacity(), "model host started");
        Ok(host)
    }
}

pub struct ModelHost {
    loader: PackageLoader,
    registry: ModelRegistry,
    training: TrainingOrchestrator,
    inference: InferenceOrchestrator,
    containment: Containment,
    packages_dir: PathBuf,
}

impl ModelHost {
    pub fn builder(config: &HostConfig) -> HostBuilder {
        HostBuilder { config: config.clone(), sources: None, analyzer: None, catalog: BuiltinCatalog::default() }
    }

    pub fn registry(&self) -> &ModelRegistry { &self.registry }
    pub fn packages_dir(&self) -> &Path { &self.packages_dir }

    /// Load and register a package. Re-upload under an existing name supersedes it atomically;
    /// the old instance is retired before this returns.
    pub async fn upload(&self, name: &str, bytes: Vec<u8>) -> RuntimeResult<ModelSummary> {
        validate_name(name)?;
        let loader = self.loader.clone();
        let owned = name.to_string();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&owned, &bytes))
            .await
            .map_err(|e| RuntimeError::Host(format!("loader task: {e}")))?;
        let loaded = match loaded {
            Ok(l) => l,
            Err(e) => {
                HOST_METRICS.load_failures_total.add(1, &[KeyValue::new("reason", load_reason(&e))]);
                warn!(model = name, error = %e, "package rejected");
                return Err(e.into());
            }
        };
        let registered = self.registry.register(ModelInstance::new(name, loaded));
        HOST_METRICS.uploads_total.add(1, &[]);
        info!(model = name, version = registered.instance.version(), replaced = registered.replaced.is_some(), "package registered");
        if let Some(old) = registered.replaced {
            old.retire().await;
            HOST_METRICS.retired_total.add(1, &[KeyValue::new("cause", "replaced")]);
        }
        Ok(registered.instance.summary())
    }

    /// Upload every `*.zip` in `dir` (file stem = model name). Bad packages are logged and skipped.
    pub async fn upload_dir(&self, dir: &Path) -> RuntimeResult<usize> {
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| RuntimeError::Host(format!("preload dir {}: {e}", dir.display())))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| RuntimeError::Host(e.to_string()))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("zip") { paths.push(path); }
        }
        paths.sort();
        let mut loaded = 0;
        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else { continue };
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => { warn!(path = %path.display(), error = %e, "preload read failed"); continue; }
            };
            match self.upload(&name, bytes).await {
                Ok(_) => loaded += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "preload skipped"),
            }
        }
        Ok(loaded)
    }

    pub async fn train(&self, name: &str, source: &DataSourceRef, target: &str, options: &Options) -> RuntimeResult<TrainResult> {
        let instance = self.instance(name)?;
        self.training.train(&instance, source, target, options).await
    }

    pub async fn predict_rows(&self, name: &str, rows: &RowSet, options: &Options) -> RuntimeResult<Vec<PredictionRecord>> {
        let instance = self.instance(name)?;
        self.inference.predict_rows(&instance, rows, options).await
    }

    pub async fn predict_datasource(&self, name: &str, source: &DataSourceRef, options: &Options) -> RuntimeResult<Vec<PredictionRecord>> {
        let instance = self.instance(name)?;
        self.inference.predict_datasource(&instance, source, options).await
    }

    pub async fn delete(&self, name: &str) -> RuntimeResult<ModelSummary> {
        let instance = self.registry.delete(name).ok_or_else(|| RuntimeError::ModelNotFound(name.to_string()))?;
        let summary = instance.summary();
        instance.retire().await;
        HOST_METRICS.retired_total.add(1, &[KeyValue::new("cause", "deleted")]);
        Ok(summary)
    }

    pub fn describe(&self, name: &str) -> RuntimeResult<ModelSummary> { Ok(self.instance(name)?.summary()) }

    pub fn list(&self) -> Vec<ModelSummary> { self.registry.list() }

    /// Refuse new model calls, then retire every instance.
    pub async fn shutdown(&self) {
        self.containment.close();
        let instances = self.registry.drain();
        let n = instances.len();
        for instance in instances { instance.retire().await; }
        info!(retired = n, "model host stopped");
    }

    fn instance(&self, name: &str) -> RuntimeResult<Arc<ModelInstance>> {
        self.registry.get(name).ok_or_else(|| RuntimeError::ModelNotFound(name.to_string()))
    }
}

fn validate_name(name: &str) -> RuntimeResult<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok { Ok(()) } else { Err(RuntimeError::InvalidRequest(format!("invalid model name `{name}`"))) }
}

fn load_reason(e: &LoadError) -> &'static str {
    match e {
        LoadError::Malformed(_) => "malformed",
        LoadError::MissingCapability(_) => "missing_capability",
        LoadError::EntryAmbiguous(_) => "entry_ambiguous",
        LoadError::Io(_) => "io",
    }
}
