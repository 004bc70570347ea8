//! Training orchestrator: resolve data, analyse it, then setup (once) and fit under the instance lock.

use modelhost_core::HOST_METRICS;
use modelhost_resilience::Containment;
use opentelemetry::KeyValue;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::analysis::DataAnalyzer;
use crate::datasource::{resolve_ref, DataSource, DataSourceRef};
use crate::error::{RuntimeError, RuntimeResult};
use crate::instance::ModelInstance;
use crate::rows::Options;

/// Success marker. Row count and duration are informational.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainResult {
    pub name: String,
    pub version: u64,
    pub rows: usize,
    pub duration_ms: u64,
}

pub struct TrainingOrchestrator {
    sources: Arc<dyn DataSource>,
    analyzer: Arc<dyn DataAnalyzer>,
    containment: Containment,
    fit_timeout: Duration,
}

impl TrainingOrchestrator {
    pub fn new(sources: Arc<dyn DataSource>, analyzer: Arc<dyn DataAnalyzer>, containment: Containment, fit_timeout: Duration) -> Self {
        Self { sources, analyzer, containment, fit_timeout }
    }

    pub async fn train(&self, instance: &ModelInstance, source: &DataSourceRef, target: &str, options: &Options) -> RuntimeResult<TrainResult> {
        let name = instance.name();
        if target.trim().is_empty() { return Err(RuntimeError::InvalidRequest("target column must not be empty".into())); }
        let rows = resolve_ref(self.sources.as_ref(), source).await?;
        if rows.is_empty() { return Err(RuntimeError::InvalidRequest(format!("data source {} has no rows", source.describe()))); }
        if !rows.has_column(target) {
            return Err(RuntimeError::InvalidRequest(format!("target column `{target}` not in data source {}", source.describe())));
        }
        let analysis = self.analyzer.analyze(&rows, target).map_err(|e| RuntimeError::Analysis(e.0))?;

        let mut guard = instance.lock().await;
        let model = guard.as_mut().ok_or_else(|| RuntimeError::ModelNotFound(name.to_string()))?;
        // Wait for an execution slot before touching status: a busy host leaves the instance as it was.
        let exec = self.containment.acquire(self.fit_timeout).await.map_err(|c| {
            let err = RuntimeError::contained(c, |fault| RuntimeError::Train { name: name.to_string(), fault });
            warn!(model = name, error = %err, "training not started");
            err
        })?;
        info!(model = name, version = instance.version(), source = %source.describe(), target, rows = rows.len(), "training started");
        instance.begin_training();
        let started = Instant::now();
        let wrap = |fault| RuntimeError::Train { name: name.to_string(), fault };

        if !instance.setup_done() {
            match exec.run(self.fit_timeout, model.setup()).await {
                Ok(Ok(())) => instance.mark_setup_done(),
                Ok(Err(fault)) => return Err(self.failed(instance, started, wrap(fault))),
                Err(c) => return Err(self.failed(instance, started, RuntimeError::contained(c, wrap))),
            }
        }

        match exec.run(self.fit_timeout, model.fit(&rows, target, &analysis, options)).await {
            Ok(Ok(())) => {
                instance.mark_trained(target);
                let elapsed = started.elapsed();
                HOST_METRICS.trainings_total.add(1, &[KeyValue::new("outcome", "trained")]);
                HOST_METRICS.training_latency_ms.record(elapsed.as_secs_f64() * 1000.0, &[]);
                info!(model = name, version = instance.version(), ms = elapsed.as_millis() as u64, "training finished");
                Ok(TrainResult { name: name.to_string(), version: instance.version(), rows: rows.len(), duration_ms: elapsed.as_millis() as u64 })
            }
            Ok(Err(fault)) => Err(self.failed(instance, started, wrap(fault))),
            Err(c) => Err(self.failed(instance, started, RuntimeError::contained(c, wrap))),
        }
    }

    fn failed(&self, instance: &ModelInstance, started: Instant, err: RuntimeError) -> RuntimeError {
        instance.mark_failed(err.to_string());
        HOST_METRICS.trainings_total.add(1, &[KeyValue::new("outcome", "failed")]);
        HOST_METRICS.training_latency_ms.record(started.elapsed().as_secs_f64() * 1000.0, &[]);
        if let RuntimeError::Train { fault, .. } = &err {
            HOST_METRICS.model_faults_total.add(1, &[KeyValue::new("phase", "fit"), KeyValue::new("kind", fault.kind())]);
        }
        warn!(model = instance.name(), version = instance.version(), error = %err, "training failed");
        err
    }
}
