//! Ordinary least squares (optionally ridge) over numeric feature columns.

use async_trait::async_trait;

use super::BuiltinSpec;
use crate::analysis::{ColumnKind, DataAnalysis};
use crate::error::ModelFault;
use crate::model::{Model, PredictionFrame};
use crate::rows::{Options, RowSet, Value};

#[derive(Debug, Clone)]
pub struct LinearRegression {
    configured: Vec<String>,
    fit_intercept: bool,
    l2: f64,
    ready: bool,
    fitted: Option<Fitted>,
}

#[derive(Debug, Clone, PartialEq)]
struct Fitted {
    target: String,
    features: Vec<String>,
    coef: Vec<f64>,
    intercept: f64,
}

impl LinearRegression {
    pub fn new(features: Vec<String>) -> Self {
        Self { configured: features, fit_intercept: true, l2: 0.0, ready: false, fitted: None }
    }

    /// Params: `fit_intercept` (bool, default true), `l2` (ridge penalty >= 0, default 0).
    pub fn from_spec(spec: BuiltinSpec) -> Result<Self, String> {
        let mut m = Self::new(spec.features);
        for (k, v) in &spec.params {
            match k.as_str() {
                "fit_intercept" => m.fit_intercept = v.as_bool().ok_or("fit_intercept must be a bool")?,
                "l2" => {
                    m.l2 = v.as_f64().filter(|x| *x >= 0.0).ok_or("l2 must be a non-negative number")?;
                }
                other => return Err(format!("unknown param `{other}`")),
            }
        }
        Ok(m)
    }

    pub fn coefficients(&self) -> Option<(&[String], &[f64], f64)> {
        self.fitted.as_ref().map(|f| (f.features.as_slice(), f.coef.as_slice(), f.intercept))
    }

    fn pick_features(&self, rows: &RowSet, target: &str, analysis: &DataAnalysis) -> Result<Vec<String>, ModelFault> {
        let features: Vec<String> = if self.configured.is_empty() {
            rows.columns()
                .iter()
                .filter(|c| c.as_str() != target)
                .filter(|c| analysis.columns.get(c.as_str()).map(|s| s.kind == ColumnKind::Numeric).unwrap_or(false))
                .cloned()
                .collect()
        } else {
            self.configured.clone()
        };
        if features.is_empty() { return Err(ModelFault::raised("no numeric feature columns to fit on")); }
        if features.iter().any(|f| f == target) { return Err(ModelFault::raised(format!("target `{target}` listed as a feature"))); }
        Ok(features)
    }
}

fn matrix(rows: &RowSet, features: &[String]) -> Result<Vec<Vec<f64>>, ModelFault> {
    features.iter().map(|f| rows.numeric_column(f).map_err(|e| ModelFault::raised(e.to_string()))).collect()
}

/// Gaussian elimination with partial pivoting; `None` when singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = (0..n).map(|i| a[i][i].abs()).fold(0.0, f64::max);
    let eps = 1e-12 * (1.0 + scale);
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= eps { return None; }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for r in col + 1..n {
            let factor = a[r][col] / a[col][col];
            if factor == 0.0 { continue; }
            for c in col..n { a[r][c] -= factor * a[col][c]; }
            b[r] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for r in (0..n).rev() {
        let tail: f64 = (r + 1..n).map(|c| a[r][c] * x[c]).sum();
        x[r] = (b[r] - tail) / a[r][r];
    }
    Some(x)
}

#[async_trait]
impl Model for LinearRegression {
    fn kind(&self) -> String { "builtin:linear_regression".into() }

    async fn setup(&mut self) -> Result<(), ModelFault> {
        self.fitted = None;
        self.ready = true;
        Ok(())
    }

    async fn fit(&mut self, rows: &RowSet, target: &str, analysis: &DataAnalysis, _options: &Options) -> Result<(), ModelFault> {
        if !self.ready { return Err(ModelFault::raised("fit called before setup")); }
        // Retraining starts from scratch.
        self.fitted = None;
        let features = self.pick_features(rows, target, analysis)?;
        let x = matrix(rows, &features)?;
        let y = rows.numeric_column(target).map_err(|e| ModelFault::raised(e.to_string()))?;
        let n = y.len() as f64;
        let p = features.len();

        let (x_mean, y_mean) = if self.fit_intercept {
            (x.iter().map(|col| col.iter().sum::<f64>() / n).collect::<Vec<_>>(), y.iter().sum::<f64>() / n)
        } else {
            (vec![0.0; p], 0.0)
        };
        let mut ata = vec![vec![0.0; p]; p];
        let mut atb = vec![0.0; p];
        for i in 0..p {
            for j in i..p {
                let s: f64 = x[i].iter().zip(&x[j]).map(|(a, b)| (a - x_mean[i]) * (b - x_mean[j])).sum();
                ata[i][j] = s;
                ata[j][i] = s;
            }
            ata[i][i] += self.l2;
            atb[i] = x[i].iter().zip(&y).map(|(a, t)| (a - x_mean[i]) * (t - y_mean)).sum();
        }
        let coef = solve(ata, atb).ok_or_else(|| ModelFault::raised("design matrix is singular (constant or collinear features)"))?;
        let intercept = y_mean - coef.iter().zip(&x_mean).map(|(c, m)| c * m).sum::<f64>();
        self.fitted = Some(Fitted { target: target.to_string(), features, coef, intercept });
        Ok(())
    }

    async fn predict(&mut self, rows: &RowSet, _options: &Options) -> Result<PredictionFrame, ModelFault> {
        let fitted = self.fitted.as_ref().ok_or_else(|| ModelFault::raised("predict called before fit"))?;
        let x = matrix(rows, &fitted.features)?;
        let out = (0..rows.len())
            .map(|r| Value::Float(fitted.intercept + fitted.coef.iter().enumerate().map(|(i, c)| c * x[i][r]).sum::<f64>()))
            .collect();
        Ok(PredictionFrame::new().with_column(fitted.target.clone(), out))
    }
}
