#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use model_host::{row, MemorySource, ModelHost, RowSet};
use modelhost_core::HostConfig;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::TempDir;

pub const LINEAR_MANIFEST: &str = "runtime: builtin\nalgorithm: linear_regression\nfeatures: [initial_price]\n";

pub fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, body) in files {
        w.start_file(*name, zip::write::FileOptions::default()).unwrap();
        w.write_all(body.as_bytes()).unwrap();
    }
    w.finish().unwrap().into_inner()
}

pub fn linear_package() -> Vec<u8> { zip_of(&[("model.yaml", LINEAR_MANIFEST)]) }

/// Home-rentals shaped rows: rental_price tracks initial_price roughly 1:1.
pub fn rentals(n: usize, seed: u64) -> RowSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let locations = ["great", "good", "poor"];
    (0..n)
        .map(|i| {
            let initial: i64 = rng.gen_range(1000..10000);
            let noise: i64 = rng.gen_range(-150..150);
            row! {
                "id" => i as i64,
                "number_of_rooms" => rng.gen_range(0..4_i64),
                "sqft" => rng.gen_range(300..2000_i64),
                "location" => locations[i % 3],
                "initial_price" => initial,
                "rental_price" => initial + noise,
            }
        })
        .collect()
}

pub fn rentals_csv(n: usize, seed: u64) -> String {
    let rows = rentals(n, seed);
    let cols = ["id", "number_of_rooms", "sqft", "location", "initial_price", "rental_price"];
    let mut out = cols.join(",");
    out.push('\n');
    for r in rows.iter() {
        let line: Vec<String> = cols
            .iter()
            .map(|c| match &r[*c] {
                model_host::Value::Int(i) => i.to_string(),
                model_host::Value::Float(f) => f.to_string(),
                model_host::Value::Text(s) => s.clone(),
                model_host::Value::Null => String::new(),
            })
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

pub fn config(dir: &TempDir) -> HostConfig {
    HostConfig {
        packages_dir: dir.path().join("packages"),
        data_dir: dir.path().join("data"),
        fit_timeout_secs: 30,
        predict_timeout_secs: 30,
        max_concurrent_executions: 4,
        ..HostConfig::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub host: ModelHost,
    pub sources: Arc<MemorySource>,
}

pub async fn harness() -> Harness { harness_with(|_| {}).await }

pub async fn harness_with(tweak: impl FnOnce(&mut HostConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir);
    tweak(&mut cfg);
    let sources = Arc::new(MemorySource::new());
    sources.save("hr", rentals(300, 7));
    let host = ModelHost::builder(&cfg).sources(sources.clone()).start().await.unwrap();
    Harness { dir, host, sources }
}

/// Number of live package directories.
pub fn package_dirs(h: &Harness) -> usize {
    std::fs::read_dir(h.host.packages_dir()).map(|d| d.count()).unwrap_or(0)
}
