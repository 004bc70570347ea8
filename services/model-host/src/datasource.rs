//! Data-access collaborator: turns a `DataSourceRef` into an ordered, finite row set.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SourceError;
use crate::rows::{Row, RowSet, Value};

/// Either a source known by name or rows supplied inline with the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataSourceRef {
    Named(String),
    Inline(RowSet),
}

impl From<&str> for DataSourceRef { fn from(s: &str) -> Self { DataSourceRef::Named(s.to_string()) } }
impl From<RowSet> for DataSourceRef { fn from(r: RowSet) -> Self { DataSourceRef::Inline(r) } }

impl DataSourceRef {
    pub fn describe(&self) -> String {
        match self {
            DataSourceRef::Named(n) => n.clone(),
            DataSourceRef::Inline(r) => format!("<inline:{} rows>", r.len()),
        }
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<RowSet, SourceError>;
}

/// Inline refs borrow; named refs go through the collaborator.
pub async fn resolve_ref<'a>(source: &dyn DataSource, r: &'a DataSourceRef) -> Result<Cow<'a, RowSet>, SourceError> {
    match r {
        DataSourceRef::Inline(rows) => Ok(Cow::Borrowed(rows)),
        DataSourceRef::Named(name) => {
            let rows = source.resolve(name).await?;
            debug!(source = %name, rows = rows.len(), "data source resolved");
            Ok(Cow::Owned(rows))
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySource {
    sets: RwLock<HashMap<String, RowSet>>,
}

impl MemorySource {
    pub fn new() -> Self { Self::default() }

    pub fn save(&self, name: impl Into<String>, rows: RowSet) -> Option<RowSet> { self.sets.write().insert(name.into(), rows) }
    pub fn remove(&self, name: &str) -> Option<RowSet> { self.sets.write().remove(name) }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.sets.read().keys().cloned().collect();
        v.sort();
        v
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn resolve(&self, name: &str) -> Result<RowSet, SourceError> {
        self.sets.read().get(name).cloned().ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}

/// `<dir>/<name>.csv` files with a header row. Cells are typed int, then float, then text; empty is null.
#[derive(Debug, Clone)]
pub struct CsvDirSource {
    dir: PathBuf,
}

impl CsvDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn dir(&self) -> &Path { &self.dir }

    fn path_for(&self, name: &str) -> Result<PathBuf, SourceError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid { return Err(SourceError::NotFound(name.to_string())); }
        Ok(self.dir.join(format!("{name}.csv")))
    }

    /// Copy a CSV file into the directory under `name`, replacing an existing source.
    pub async fn save_file(&self, name: &str, from: &Path) -> Result<(), SourceError> {
        let dest = self.path_for(name)?;
        let unavailable = |e: std::io::Error| SourceError::Unavailable { name: name.to_string(), reason: e.to_string() };
        tokio::fs::create_dir_all(&self.dir).await.map_err(unavailable)?;
        tokio::fs::copy(from, &dest).await.map_err(unavailable)?;
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<(), SourceError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SourceError::NotFound(name.to_string())),
            Err(e) => Err(SourceError::Unavailable { name: name.to_string(), reason: e.to_string() }),
        }
    }
}

#[async_trait]
impl DataSource for CsvDirSource {
    async fn resolve(&self, name: &str) -> Result<RowSet, SourceError> {
        let path = self.path_for(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(SourceError::NotFound(name.to_string())),
            Err(e) => return Err(SourceError::Unavailable { name: name.to_string(), reason: e.to_string() }),
        };
        parse_csv(&bytes).map_err(|e| SourceError::Unavailable { name: name.to_string(), reason: e.to_string() })
    }
}

pub fn parse_csv(bytes: &[u8]) -> Result<RowSet, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::Headers).from_reader(bytes);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut set = RowSet::with_columns(headers.clone());
    for record in rdr.records() {
        let record = record?;
        let row: Row = headers.iter().zip(record.iter()).map(|(h, cell)| (h.clone(), Value::parse_cell(cell))).collect();
        set.push(row);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[tokio::test]
    async fn memory_source_round_trip() {
        let src = MemorySource::new();
        assert_eq!(src.resolve("hr").await, Err(SourceError::NotFound("hr".into())));
        src.save("hr", RowSet::single(row! {"a" => 1_i64}));
        assert_eq!(src.resolve("hr").await.unwrap().len(), 1);
        assert_eq!(src.names(), vec!["hr".to_string()]);
        assert!(src.remove("hr").is_some());
    }

    #[tokio::test]
    async fn csv_source_types_cells_and_keeps_header_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rentals.csv"), "sqft,location,initial_price\n917,great,3000\n194.5,poor,\n").unwrap();
        let src = CsvDirSource::new(dir.path());
        let rows = src.resolve("rentals").await.unwrap();
        assert_eq!(rows.columns(), &["sqft".to_string(), "location".to_string(), "initial_price".to_string()]);
        assert_eq!(rows.rows()[0]["sqft"], Value::Int(917));
        assert_eq!(rows.rows()[1]["sqft"], Value::Float(194.5));
        assert_eq!(rows.rows()[0]["location"], Value::Text("great".into()));
        assert!(rows.rows()[1]["initial_price"].is_null());
    }

    #[tokio::test]
    async fn csv_source_saves_and_removes_files() {
        let upload = tempfile::tempdir().unwrap();
        let incoming = upload.path().join("upload.csv");
        std::fs::write(&incoming, "initial_price,rental_price\n1000,1100\n2000,2050\n").unwrap();

        let store = tempfile::tempdir().unwrap();
        let src = CsvDirSource::new(store.path().join("sources"));
        src.save_file("home_rentals", &incoming).await.unwrap();
        assert_eq!(src.resolve("home_rentals").await.unwrap().numeric_column("rental_price").unwrap(), vec![1100.0, 2050.0]);

        std::fs::write(&incoming, "initial_price,rental_price\n3000,3100\n").unwrap();
        src.save_file("home_rentals", &incoming).await.unwrap();
        assert_eq!(src.resolve("home_rentals").await.unwrap().len(), 1);

        assert_eq!(src.save_file("../outside", &incoming).await, Err(SourceError::NotFound("../outside".into())));
        src.remove("home_rentals").await.unwrap();
        assert_eq!(src.resolve("home_rentals").await, Err(SourceError::NotFound("home_rentals".into())));
        assert_eq!(src.remove("home_rentals").await, Err(SourceError::NotFound("home_rentals".into())));
    }

    #[tokio::test]
    async fn csv_source_distinguishes_missing_from_broken() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ragged.csv"), "a,b\n1,2\n3\n").unwrap();
        let src = CsvDirSource::new(dir.path());
        assert_eq!(src.resolve("nope").await, Err(SourceError::NotFound("nope".into())));
        assert_eq!(src.resolve("../etc/passwd").await, Err(SourceError::NotFound("../etc/passwd".into())));
        assert!(matches!(src.resolve("ragged").await, Err(SourceError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn inline_refs_skip_the_collaborator() {
        let src = MemorySource::new();
        let r = DataSourceRef::Inline(RowSet::single(row! {"x" => 1_i64}));
        assert_eq!(resolve_ref(&src, &r).await.unwrap().len(), 1);
        assert!(resolve_ref(&src, &DataSourceRef::from("missing")).await.is_err());
    }
}
