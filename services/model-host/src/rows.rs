//! Typed rows: ordered column -> tagged value mappings and the row sets built from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Free-form options forwarded untouched to `fit`/`predict` (the `kwargs` of an upload request).
pub type Options = serde_json::Map<String, serde_json::Value>;

pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view: ints widen, text parses if it looks like a number, null is never numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            Value::Float(_) | Value::Null => None,
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// Type a raw text cell: empty -> null, then integer, then float, else text.
    pub fn parse_cell(raw: &str) -> Value {
        let t = raw.trim();
        if t.is_empty() { return Value::Null; }
        if let Ok(i) = t.parse::<i64>() { return Value::Int(i); }
        if let Ok(f) = t.parse::<f64>() { if f.is_finite() { return Value::Float(f); } }
        Value::Text(raw.to_string())
    }
}

impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Text(v.to_string()) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Text(v) } }

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column `{0}` not present")]
    Missing(String),
    #[error("column `{column}` row {row} is not numeric")]
    NonNumeric { column: String, row: usize },
}

/// Finite, ordered set of rows. `columns` keeps first-seen order across rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RowSet {
    pub fn new() -> Self { Self::default() }

    /// Empty set whose column order is fixed up front (e.g. a CSV header).
    pub fn with_columns(columns: Vec<String>) -> Self { Self { columns, rows: Vec::new() } }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut set = Self::new();
        for r in rows { set.push(r); }
        set
    }

    /// One ad-hoc row, e.g. the `when` clause of a single prediction.
    pub fn single(row: Row) -> Self { Self::from_rows(vec![row]) }

    pub fn push(&mut self, row: Row) {
        for k in row.keys() {
            if !self.columns.iter().any(|c| c == k) { self.columns.push(k.clone()); }
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    pub fn columns(&self) -> &[String] { &self.columns }
    pub fn rows(&self) -> &[Row] { &self.rows }
    pub fn iter(&self) -> impl Iterator<Item = &Row> { self.rows.iter() }
    pub fn has_column(&self, name: &str) -> bool { self.columns.iter().any(|c| c == name) }

    /// Column projection; rows lacking the column yield `Null`.
    pub fn column(&self, name: &str) -> Vec<Value> {
        self.rows.iter().map(|r| r.get(name).cloned().unwrap_or(Value::Null)).collect()
    }

    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>, ColumnError> {
        if !self.has_column(name) { return Err(ColumnError::Missing(name.to_string())); }
        self.rows
            .iter()
            .enumerate()
            .map(|(i, r)| r.get(name).and_then(Value::as_f64).ok_or_else(|| ColumnError::NonNumeric { column: name.to_string(), row: i }))
            .collect()
    }
}

impl From<Vec<Row>> for RowSet { fn from(rows: Vec<Row>) -> Self { Self::from_rows(rows) } }

impl FromIterator<Row> for RowSet {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self { Self::from_rows(iter.into_iter().collect()) }
}

/// `row!{"a" => 1_i64, "b" => "x"}` style helper used by tests and embedders.
#[macro_export]
macro_rules! row {
    ($($k:expr => $v:expr),* $(,)?) => {{
        let mut r = $crate::rows::Row::new();
        $( r.insert($k.to_string(), $crate::rows::Value::from($v)); )*
        r
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_typed() {
        assert_eq!(Value::parse_cell("42"), Value::Int(42));
        assert_eq!(Value::parse_cell("4.5"), Value::Float(4.5));
        assert_eq!(Value::parse_cell(" "), Value::Null);
        assert_eq!(Value::parse_cell("downtown"), Value::Text("downtown".into()));
        assert_eq!(Value::parse_cell("NaN"), Value::Text("NaN".into()));
    }

    #[test]
    fn json_shape_is_untagged() {
        let r: Row = serde_json::from_str(r#"{"a":5000,"b":1.5,"c":"x","d":null}"#).unwrap();
        assert_eq!(r["a"], Value::Int(5000));
        assert_eq!(r["b"], Value::Float(1.5));
        assert_eq!(r["c"], Value::Text("x".into()));
        assert!(r["d"].is_null());
        assert_eq!(serde_json::to_string(&r).unwrap(), r#"{"a":5000,"b":1.5,"c":"x","d":null}"#);
    }

    #[test]
    fn columns_keep_first_seen_order() {
        let set = RowSet::from_rows(vec![row! {"b" => 1_i64}, row! {"a" => 2_i64, "b" => 3_i64}]);
        assert_eq!(set.columns(), &["b".to_string(), "a".to_string()]);
        assert_eq!(set.column("a"), vec![Value::Null, Value::Int(2)]);
    }

    #[test]
    fn numeric_projection_reports_offending_row() {
        let set = RowSet::from_rows(vec![row! {"x" => 1_i64}, row! {"x" => "n/a"}]);
        assert_eq!(set.numeric_column("x"), Err(ColumnError::NonNumeric { column: "x".into(), row: 1 }));
        assert_eq!(set.numeric_column("y"), Err(ColumnError::Missing("y".into())));
        let ok = RowSet::from_rows(vec![row! {"x" => 1_i64}, row! {"x" => "2.5"}]);
        assert_eq!(ok.numeric_column("x").unwrap(), vec![1.0, 2.5]);
    }
}
