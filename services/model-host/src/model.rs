//! The lifecycle contract every hosted model satisfies, whatever runtime backs it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::analysis::DataAnalysis;
use crate::error::ModelFault;
use crate::rows::{Options, RowSet, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability { Setup, Fit, Predict }

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Setup, Capability::Fit, Capability::Predict];

    pub fn as_str(&self) -> &'static str {
        match self { Capability::Setup => "setup", Capability::Fit => "fit", Capability::Predict => "predict" }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Table-like model output: column name -> one value per input row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionFrame {
    columns: BTreeMap<String, Vec<Value>>,
}

impl PredictionFrame {
    pub fn new() -> Self { Self::default() }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Value>) { self.columns.insert(name.into(), values); }
    pub fn column(&self, name: &str) -> Option<&[Value]> { self.columns.get(name).map(Vec::as_slice) }
    pub fn names(&self) -> impl Iterator<Item = &str> { self.columns.keys().map(String::as_str) }
    pub fn is_empty(&self) -> bool { self.columns.is_empty() }
}

/// Capability set {setup, fit, predict}. `setup` runs once per instance, before the first `fit`.
///
/// Errors returned here are user-model faults: the host records them against the
/// instance and keeps serving everything else.
#[async_trait]
pub trait Model: Send {
    /// Runtime label for logs and listings (`builtin:linear_regression`, `process`).
    fn kind(&self) -> String;

    async fn setup(&mut self) -> Result<(), ModelFault>;

    async fn fit(&mut self, rows: &RowSet, target: &str, analysis: &DataAnalysis, options: &Options) -> Result<(), ModelFault>;

    async fn predict(&mut self, rows: &RowSet, options: &Options) -> Result<PredictionFrame, ModelFault>;

    /// Release whatever the model holds outside the host (child processes).
    async fn shutdown(&mut self) {}
}
