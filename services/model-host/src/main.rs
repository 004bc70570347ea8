use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use modelhost_core::{init_tracing, init_metrics, shutdown_metrics, start_health_server, mark_ready, clear_ready, load_config, record_config_version};
use model_host::{CsvDirSource, ModelHost};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("model-host")?;
    init_metrics()?;

    let cfg = load_config("model-host")?;
    info!(?cfg, "config loaded");
    record_config_version(cfg.config_version.clone());

    let addr = start_health_server(cfg.health_port).await?;

    let host = ModelHost::builder(&cfg)
        .sources(Arc::new(CsvDirSource::new(&cfg.data_dir)))
        .start()
        .await?;
    if let Some(dir) = &cfg.preload_dir {
        let loaded = host.upload_dir(dir).await?;
        info!(loaded, dir = %dir.display(), "preloaded packages");
    }
    mark_ready();
    info!(%addr, "service ready");

    signal::ctrl_c().await?;
    clear_ready();
    info!("shutdown");
    host.shutdown().await;
    shutdown_metrics();
    Ok(())
}
