//! Inference orchestrator: run `predict` on a trained instance and normalise the frame it returns
//! into one `PredictionRecord` per input row.

use modelhost_core::HOST_METRICS;
use modelhost_resilience::Containment;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::datasource::{resolve_ref, DataSource, DataSourceRef};
use crate::error::{ModelFault, RuntimeError, RuntimeResult};
use crate::instance::ModelInstance;
use crate::model::PredictionFrame;
use crate::rows::{Options, RowSet, Value};

/// Prediction for one target column: the value as `f64` plus whatever metadata the model attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPrediction {
    pub predicted_value: f64,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

/// Field name of the prediction itself; a metadata column may not shadow it.
const PREDICTED_VALUE: &str = "predicted_value";

/// Target column -> prediction, for a single input row.
pub type PredictionRecord = BTreeMap<String, TargetPrediction>;

pub struct InferenceOrchestrator {
    sources: Arc<dyn DataSource>,
    containment: Containment,
    predict_timeout: Duration,
}

impl InferenceOrchestrator {
    pub fn new(sources: Arc<dyn DataSource>, containment: Containment, predict_timeout: Duration) -> Self {
        Self { sources, containment, predict_timeout }
    }

    /// Ad-hoc rows, e.g. a single `when` mapping.
    pub async fn predict_rows(&self, instance: &ModelInstance, rows: &RowSet, options: &Options) -> RuntimeResult<Vec<PredictionRecord>> {
        self.run(instance, rows, options).await
    }

    /// One record per resolved row, in source order.
    pub async fn predict_datasource(&self, instance: &ModelInstance, source: &DataSourceRef, options: &Options) -> RuntimeResult<Vec<PredictionRecord>> {
        // Cheap pre-check so an untrained model never costs a data load; `run` re-checks under the lock.
        ensure_trained(instance)?;
        let rows = resolve_ref(self.sources.as_ref(), source).await?;
        self.run(instance, &rows, options).await
    }

    async fn run(&self, instance: &ModelInstance, rows: &RowSet, options: &Options) -> RuntimeResult<Vec<PredictionRecord>> {
        let name = instance.name();
        let mut guard = instance.lock().await;
        let target = ensure_trained(instance)?;
        let model = guard.as_mut().ok_or_else(|| RuntimeError::ModelNotFound(name.to_string()))?;
        if rows.is_empty() { return Ok(Vec::new()); }

        let wrap = |fault| RuntimeError::Predict { name: name.to_string(), fault };
        let exec = self.containment.acquire(self.predict_timeout).await.map_err(|c| RuntimeError::contained(c, wrap))?;
        let started = Instant::now();
        let frame = match exec.run(self.predict_timeout, model.predict(rows, options)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(fault)) => return Err(self.fault(instance, fault)),
            Err(c) => return Err(match RuntimeError::contained(c, wrap) {
                RuntimeError::Predict { fault, .. } => self.fault(instance, fault),
                other => other,
            }),
        };
        drop(exec);
        let records = normalize(&frame, std::slice::from_ref(&target), rows.len()).map_err(|msg| self.fault(instance, ModelFault::BadOutput(msg)))?;

        HOST_METRICS.predicted_rows_total.add(records.len() as u64, &[]);
        HOST_METRICS.prediction_latency_ms.record(started.elapsed().as_secs_f64() * 1000.0, &[]);
        debug!(model = name, rows = records.len(), "prediction served");
        Ok(records)
    }

    fn fault(&self, instance: &ModelInstance, fault: ModelFault) -> RuntimeError {
        HOST_METRICS.model_faults_total.add(1, &[KeyValue::new("phase", "predict"), KeyValue::new("kind", fault.kind())]);
        if fault.lost_state() {
            instance.mark_failed(format!("model runtime lost during predict: {fault}"));
        }
        warn!(model = instance.name(), error = %fault, "prediction failed");
        RuntimeError::Predict { name: instance.name().to_string(), fault }
    }
}

fn ensure_trained(instance: &ModelInstance) -> RuntimeResult<String> {
    instance.trained_target().map_err(|status| RuntimeError::NotTrained { name: instance.name().to_string(), status })
}

/// Shape a frame into records. Every target must be a full-length numeric column; columns named
/// `<target>_<key>` ride along as metadata `<key>` of that target, except `<target>_predicted_value`.
pub fn normalize(frame: &PredictionFrame, targets: &[String], expected_rows: usize) -> Result<Vec<PredictionRecord>, String> {
    let mut records: Vec<PredictionRecord> = vec![PredictionRecord::new(); expected_rows];
    for target in targets {
        let values = frame.column(target).ok_or_else(|| format!("no `{target}` column in model output"))?;
        if values.len() != expected_rows {
            return Err(format!("`{target}` has {} values for {expected_rows} rows", values.len()));
        }
        let prefix = format!("{target}_");
        let meta: Vec<(&str, &[Value])> = frame
            .names()
            .filter_map(|n| n.strip_prefix(prefix.as_str()).filter(|k| !k.is_empty() && *k != PREDICTED_VALUE).map(|k| (k, n)))
            .filter_map(|(k, n)| frame.column(n).map(|col| (k, col)))
            .collect();
        for (key, col) in &meta {
            if col.len() != expected_rows { return Err(format!("metadata `{target}_{key}` has {} values for {expected_rows} rows", col.len())); }
        }
        for (i, record) in records.iter_mut().enumerate() {
            let predicted_value = values[i].as_f64().ok_or_else(|| format!("`{target}` row {i} is not numeric: {:?}", values[i]))?;
            let metadata = meta.iter().map(|(k, col)| (k.to_string(), col[i].clone())).collect();
            record.insert(target.clone(), TargetPrediction { predicted_value, metadata });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_surface_as_floats_with_metadata() {
        let frame = PredictionFrame::new()
            .with_column("rental_price", vec![Value::Int(5000), Value::Text("4200.5".into())])
            .with_column("rental_price_confidence", vec![Value::Float(0.9), Value::Float(0.7)])
            .with_column("unrelated", vec![Value::Null, Value::Null]);
        let recs = normalize(&frame, &["rental_price".to_string()], 2).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["rental_price"].predicted_value, 5000.0);
        assert_eq!(recs[1]["rental_price"].predicted_value, 4200.5);
        assert_eq!(recs[0]["rental_price"].metadata["confidence"], Value::Float(0.9));
        assert_eq!(recs[0].keys().collect::<Vec<_>>(), vec!["rental_price"]);

        let json = serde_json::to_value(&recs[0]).unwrap();
        assert_eq!(json, serde_json::json!({"rental_price": {"predicted_value": 5000.0, "confidence": 0.9}}));
    }

    #[test]
    fn metadata_never_shadows_the_prediction() {
        let frame = PredictionFrame::new()
            .with_column("y", vec![Value::Float(2.0)])
            .with_column("y_predicted_value", vec![Value::Float(99.0)])
            .with_column("y_low", vec![Value::Float(1.5)]);
        let recs = normalize(&frame, &["y".to_string()], 1).unwrap();
        assert_eq!(recs[0]["y"].predicted_value, 2.0);
        assert!(!recs[0]["y"].metadata.contains_key("predicted_value"));
        let json = serde_json::to_string(&recs[0]).unwrap();
        assert_eq!(json, r#"{"y":{"predicted_value":2.0,"low":1.5}}"#);
    }

    #[test]
    fn rejects_short_missing_or_null_output() {
        let t = vec!["y".to_string()];
        let short = PredictionFrame::new().with_column("y", vec![Value::Float(1.0)]);
        assert!(normalize(&short, &t, 2).is_err());
        let missing = PredictionFrame::new().with_column("z", vec![Value::Float(1.0)]);
        assert!(normalize(&missing, &t, 1).is_err());
        let null = PredictionFrame::new().with_column("y", vec![Value::Null]);
        assert!(normalize(&null, &t, 1).is_err());
    }
}
