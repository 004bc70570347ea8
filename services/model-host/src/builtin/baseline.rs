//! Mean predictor. Useful as a smoke-test package and as a floor to compare real models against.

use async_trait::async_trait;

use crate::analysis::DataAnalysis;
use crate::error::ModelFault;
use crate::model::{Model, PredictionFrame};
use crate::rows::{Options, RowSet, Value};

#[derive(Debug, Clone, Default)]
pub struct MeanModel {
    // Accepted for manifest symmetry; the mean ignores inputs.
    _features: Vec<String>,
    fitted: Option<(String, f64, Option<f64>)>,
}

impl MeanModel {
    pub fn new(features: Vec<String>) -> Self { Self { _features: features, fitted: None } }
}

#[async_trait]
impl Model for MeanModel {
    fn kind(&self) -> String { "builtin:mean".into() }

    async fn setup(&mut self) -> Result<(), ModelFault> { Ok(()) }

    async fn fit(&mut self, rows: &RowSet, target: &str, analysis: &DataAnalysis, _options: &Options) -> Result<(), ModelFault> {
        let stats = analysis.columns.get(target);
        let mean = stats
            .and_then(|s| s.mean)
            .or_else(|| {
                let ys = rows.numeric_column(target).ok()?;
                (!ys.is_empty()).then(|| ys.iter().sum::<f64>() / ys.len() as f64)
            })
            .ok_or_else(|| ModelFault::raised(format!("target `{target}` has no numeric values")))?;
        self.fitted = Some((target.to_string(), mean, stats.and_then(|s| s.std)));
        Ok(())
    }

    async fn predict(&mut self, rows: &RowSet, _options: &Options) -> Result<PredictionFrame, ModelFault> {
        let (target, mean, std) = self.fitted.as_ref().ok_or_else(|| ModelFault::raised("predict called before fit"))?;
        let mut frame = PredictionFrame::new().with_column(target.clone(), vec![Value::Float(*mean); rows.len()]);
        if let Some(std) = std {
            frame.insert(format!("{target}_std"), vec![Value::Float(*std); rows.len()]);
        }
        Ok(frame)
    }
}
