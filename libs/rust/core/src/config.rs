//! Layered host configuration: defaults, then an optional file (`MODELHOST_CONFIG_FILE`), then `MODELHOST__*` env vars.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HostConfig {
    pub service_name: String,
    /// Root under which every uploaded package gets its own extraction directory.
    pub packages_dir: PathBuf,
    /// Directory holding `<name>.csv` data sources.
    pub data_dir: PathBuf,
    /// Optional directory of `*.zip` packages uploaded at startup (file stem = model name).
    #[serde(default)]
    pub preload_dir: Option<PathBuf>,
    pub health_port: u16,
    pub max_package_bytes: u64,
    pub fit_timeout_secs: u64,
    pub predict_timeout_secs: u64,
    pub max_concurrent_executions: usize,
    #[serde(default)]
    pub config_version: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            service_name: "model-host".into(),
            packages_dir: PathBuf::from("./var/packages"),
            data_dir: PathBuf::from("./var/data"),
            preload_dir: None,
            health_port: 9095,
            max_package_bytes: 64 * 1024 * 1024,
            fit_timeout_secs: 600,
            predict_timeout_secs: 60,
            max_concurrent_executions: 8,
            config_version: Some("0".into()),
        }
    }
}

impl HostConfig {
    pub fn fit_timeout(&self) -> Duration { Duration::from_secs(self.fit_timeout_secs) }
    pub fn predict_timeout(&self) -> Duration { Duration::from_secs(self.predict_timeout_secs) }
}

pub fn load_config(service: &str) -> Result<HostConfig> {
    let d = HostConfig::default();
    let mut builder = config::Config::builder()
        .set_default("service_name", service)?
        .set_default("packages_dir", d.packages_dir.to_string_lossy().to_string())?
        .set_default("data_dir", d.data_dir.to_string_lossy().to_string())?
        .set_default("health_port", d.health_port as i64)?
        .set_default("max_package_bytes", d.max_package_bytes as i64)?
        .set_default("fit_timeout_secs", d.fit_timeout_secs as i64)?
        .set_default("predict_timeout_secs", d.predict_timeout_secs as i64)?
        .set_default("max_concurrent_executions", d.max_concurrent_executions as i64)?
        .set_default("config_version", d.config_version.unwrap_or_default())?;

    if let Ok(file) = std::env::var("MODELHOST_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("MODELHOST").separator("__").try_parsing(true));
    let cfg: HostConfig = builder.build()?.try_deserialize()?;
    if cfg.max_concurrent_executions == 0 { anyhow::bail!("max_concurrent_executions must be at least 1"); }
    Ok(cfg)
}
