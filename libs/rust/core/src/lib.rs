//! Core shared utilities for the model host: tracing, metrics, health endpoints and config.

use anyhow::Result;
use tracing::info;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use axum::{routing::get, Router};
use opentelemetry::global;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;

pub mod config;
mod metrics_ext;

pub use config::{load_config, HostConfig};
pub use metrics_ext::{HostMetrics, HOST_METRICS};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static PROM_INIT: OnceCell<()> = OnceCell::new();
static EXPORTER: Lazy<RwLock<Option<MetricsState>>> = Lazy::new(|| RwLock::new(None));
static STATUS: Lazy<RwLock<StatusInfo>> = Lazy::new(|| RwLock::new(StatusInfo::default()));

static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);
pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn mark_not_live() { NODE_LIVENESS.store(false, Ordering::SeqCst); }
pub fn is_ready() -> bool { NODE_READINESS.load(Ordering::SeqCst) }

struct MetricsState {
    registry: prometheus::Registry,
    provider: SdkMeterProvider,
}

#[derive(Debug, Clone, Default)]
struct StatusInfo {
    service: Option<String>,
    config_version: Option<String>,
}

/// Install the global subscriber once. `RUST_LOG` drives the filter, `MODELHOST_JSON_LOG=1` switches to JSON lines.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("MODELHOST_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let fmt_layer = if json {
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
                .boxed()
        };
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::registry().with(fmt_layer).with(env_filter).try_init()?;
        Ok(())
    })?;
    STATUS.write().service = Some(service.to_string());
    info!(target: "modelhost_core", service, "tracing initialized");
    Ok(())
}

/// Wire the global meter provider to a prometheus registry served on `/metrics`.
pub fn init_metrics() -> Result<()> {
    PROM_INIT.get_or_try_init(|| -> Result<()> {
        let registry = prometheus::Registry::new();
        let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone()).build()?;
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        global::set_meter_provider(provider.clone());
        *EXPORTER.write() = Some(MetricsState { registry, provider });
        Ok(())
    })?;
    Ok(())
}

pub fn shutdown_metrics() {
    if let Some(state) = EXPORTER.write().take() {
        if let Err(e) = state.provider.shutdown() { tracing::warn!(error=?e, "meter provider shutdown failed"); }
    }
}

/// Publish the config version shown on `/status`.
pub fn record_config_version(version: Option<String>) { STATUS.write().config_version = version; }

/// Bind the health server and serve it in the background. Returns the bound address (port 0 picks a free one).
pub async fn start_health_server(port: u16) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/live", get(|| async { axum::Json(serde_json::json!({"live": NODE_LIVENESS.load(Ordering::SeqCst)})) }))
        .route("/ready", get(|| async { axum::Json(serde_json::json!({"ready": NODE_READINESS.load(Ordering::SeqCst)})) }))
        .route("/status", get(|| async {
            let status = STATUS.read().clone();
            axum::Json(serde_json::json!({
                "service": status.service,
                "live": NODE_LIVENESS.load(Ordering::SeqCst),
                "ready": NODE_READINESS.load(Ordering::SeqCst),
                "config_version": status.config_version,
            }))
        }))
        .route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    info!(?addr, "health server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error=?e, "health server failed");
        }
    });
    Ok(addr)
}

async fn metrics_handler() -> axum::response::Response {
    let families = match EXPORTER.read().as_ref() {
        Some(state) => state.registry.gather(),
        None => return plain(503, "metrics not initialized".into()),
    };
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
        return plain(500, format!("encode error: {e}").into_bytes());
    }
    axum::response::Response::builder()
        .status(200)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(axum::body::Body::from(buf))
        .unwrap_or_else(|_| plain(500, Vec::new()))
}

fn plain(status: u16, body: Vec<u8>) -> axum::response::Response {
    let mut resp = axum::response::Response::new(axum::body::Body::from(body));
    *resp.status_mut() = axum::http::StatusCode::from_u16(status).unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flag_toggles() {
        clear_ready();
        assert!(!is_ready());
        mark_ready();
        assert!(is_ready());
        clear_ready();
    }

    #[tokio::test]
    async fn health_server_binds_ephemeral_port() {
        let addr = start_health_server(0).await.unwrap();
        assert_ne!(addr.port(), 0);
    }
}
