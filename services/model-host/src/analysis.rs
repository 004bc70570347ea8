//! Data-analysis collaborator: summarises a resolved row set before it is handed to `fit`.
//! The orchestrator threads the summary through untouched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::rows::{RowSet, Value};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AnalysisError(pub String);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAnalysis {
    pub row_count: usize,
    pub target: String,
    pub columns: BTreeMap<String, ColumnStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind { Numeric, Text, Mixed, Empty }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub kind: ColumnKind,
    pub count: usize,
    pub nulls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct: Option<usize>,
}

pub trait DataAnalyzer: Send + Sync {
    fn analyze(&self, rows: &RowSet, target: &str) -> Result<DataAnalysis, AnalysisError>;
}

/// Per-column counts plus numeric moments or text cardinality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnStatsAnalyzer;

impl DataAnalyzer for ColumnStatsAnalyzer {
    fn analyze(&self, rows: &RowSet, target: &str) -> Result<DataAnalysis, AnalysisError> {
        if !rows.has_column(target) { return Err(AnalysisError(format!("target column `{target}` not in data"))); }
        let columns = rows.columns().iter().map(|c| (c.clone(), column_stats(&rows.column(c)))).collect();
        Ok(DataAnalysis { row_count: rows.len(), target: target.to_string(), columns })
    }
}

fn column_stats(values: &[Value]) -> ColumnStats {
    let mut nums = Vec::new();
    let mut texts = BTreeSet::new();
    let mut nulls = 0;
    for v in values {
        match v {
            Value::Null => nulls += 1,
            Value::Int(_) | Value::Float(_) => { if let Some(f) = v.as_f64() { nums.push(f); } }
            Value::Text(s) => { texts.insert(s.as_str()); }
        }
    }
    let text_count = values.iter().filter(|v| matches!(v, Value::Text(_))).count();
    let kind = match (nums.is_empty(), text_count == 0) {
        (true, true) => ColumnKind::Empty,
        (false, true) => ColumnKind::Numeric,
        (true, false) => ColumnKind::Text,
        (false, false) => ColumnKind::Mixed,
    };
    let (min, max, mean, std) = if nums.is_empty() {
        (None, None, None, None)
    } else {
        let n = nums.len() as f64;
        let mean = nums.iter().sum::<f64>() / n;
        let var = nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        (
            nums.iter().cloned().reduce(f64::min),
            nums.iter().cloned().reduce(f64::max),
            Some(mean),
            Some(var.sqrt()),
        )
    };
    ColumnStats {
        kind,
        count: values.len() - nulls,
        nulls,
        min,
        max,
        mean,
        std,
        distinct: if text_count > 0 { Some(texts.len()) } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn summarises_numeric_and_text_columns() {
        let rows = RowSet::from_rows(vec![
            row! {"price" => 10_i64, "loc" => "good"},
            row! {"price" => 30_i64, "loc" => "poor"},
            row! {"price" => 20.0, "loc" => "good"},
        ]);
        let a = ColumnStatsAnalyzer.analyze(&rows, "price").unwrap();
        assert_eq!(a.row_count, 3);
        let p = &a.columns["price"];
        assert_eq!(p.kind, ColumnKind::Numeric);
        assert_eq!((p.min, p.max, p.mean), (Some(10.0), Some(30.0), Some(20.0)));
        let l = &a.columns["loc"];
        assert_eq!(l.kind, ColumnKind::Text);
        assert_eq!(l.distinct, Some(2));
        assert_eq!(l.mean, None);
    }

    #[test]
    fn counts_nulls_and_rejects_unknown_target() {
        let rows = RowSet::from_rows(vec![row! {"x" => 1_i64}, row! {"y" => 2_i64}]);
        let a = ColumnStatsAnalyzer.analyze(&rows, "x").unwrap();
        assert_eq!(a.columns["x"].nulls, 1);
        assert_eq!(a.columns["x"].count, 1);
        assert!(ColumnStatsAnalyzer.analyze(&rows, "z").is_err());
    }
}
