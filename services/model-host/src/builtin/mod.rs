//! In-process model implementations selectable from a package manifest by name.

mod baseline;
mod linear;

use std::collections::BTreeMap;

use crate::error::LoadError;
use crate::model::Model;
use crate::rows::Options;

pub use baseline::MeanModel;
pub use linear::LinearRegression;

/// Manifest settings handed to a builtin factory.
#[derive(Debug, Clone, Default)]
pub struct BuiltinSpec {
    /// Explicit feature columns; empty means every numeric column but the target.
    pub features: Vec<String>,
    pub params: Options,
}

pub type Factory = fn(BuiltinSpec) -> Result<Box<dyn Model>, String>;

#[derive(Clone)]
pub struct BuiltinCatalog {
    entries: BTreeMap<&'static str, Factory>,
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        let mut c = Self::empty();
        c.register("linear_regression", |spec| LinearRegression::from_spec(spec).map(|m| Box::new(m) as Box<dyn Model>));
        c.register("mean", |spec| Ok(Box::new(MeanModel::new(spec.features)) as Box<dyn Model>));
        c
    }
}

impl BuiltinCatalog {
    pub fn empty() -> Self { Self { entries: BTreeMap::new() } }

    pub fn register(&mut self, name: &'static str, factory: Factory) { self.entries.insert(name, factory); }
    pub fn contains(&self, name: &str) -> bool { self.entries.contains_key(name) }
    pub fn names(&self) -> Vec<&'static str> { self.entries.keys().copied().collect() }

    pub fn instantiate(&self, name: &str, spec: BuiltinSpec) -> Result<Box<dyn Model>, LoadError> {
        let factory = self.entries.get(name).ok_or_else(|| LoadError::Malformed(format!("unknown algorithm `{name}`")))?;
        factory(spec).map_err(|e| LoadError::Malformed(format!("{name}: {e}")))
    }
}
