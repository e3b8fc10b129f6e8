//! The Metrics Exporter (§4.H, §6): a Prometheus-compatible `/metrics`
//! endpoint plus a `/healthz` liveness probe, served over TCP or a
//! Unix-domain socket.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};

/// Where the metrics HTTP server listens (§6: "TCP port or a Unix-domain
/// socket; socket takes precedence").
#[derive(Debug, Clone)]
pub enum MetricsBind {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

pub const DEFAULT_METRICS_PORT: u16 = 19091;

impl Default for MetricsBind {
    fn default() -> Self {
        MetricsBind::Tcp(SocketAddr::from(([0, 0, 0, 0], DEFAULT_METRICS_PORT)))
    }
}

/// Resolves the configured bind target: a Unix socket path, if given,
/// always wins over the TCP port (§6).
pub fn resolve_bind(tcp_port: Option<u16>, unix_path: Option<PathBuf>) -> MetricsBind {
    match unix_path {
        Some(path) => MetricsBind::Unix(path),
        None => MetricsBind::Tcp(SocketAddr::from((
            [0, 0, 0, 0],
            tcp_port.unwrap_or(DEFAULT_METRICS_PORT),
        ))),
    }
}

/// Lowercases a raw field/rule name and replaces `.`, `-`, `+`, space,
/// `[`, `]` with `_` (§6 "Metric names are sanitized").
pub fn sanitize_metric_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| match c {
            '.' | '-' | '+' | ' ' | '[' | ']' => '_',
            other => other,
        })
        .collect()
}

/// Holds the Prometheus registry plus the dynamically-created gauge
/// families for component fields and checker pass/fail flags.
///
/// Families are created on first use because field names are
/// component-specific and not known at compile time (§1 "out of
/// scope": exactly which fields a collector exposes).
pub struct MetricsRegistry {
    registry: Registry,
    component_gauges: DashMap<String, GaugeVec>,
    checker_gauges: DashMap<String, GaugeVec>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            component_gauges: DashMap::new(),
            checker_gauges: DashMap::new(),
        }
    }

    /// Sets the `sichek_<component>_<field>` gauge (§6). `labels` must
    /// always include the same keys for a given `(component, field)`
    /// pair across calls; `node` is always present.
    pub fn set_component_gauge(
        &self,
        component: &str,
        field: &str,
        node: &str,
        extra_labels: &[(&str, &str)],
        value: f64,
    ) -> Result<()> {
        let family = format!(
            "sichek_{}_{}",
            sanitize_metric_name(component),
            sanitize_metric_name(field)
        );
        let mut label_names: Vec<&str> = vec!["node"];
        label_names.extend(extra_labels.iter().map(|(k, _)| *k));

        let gauge = self.gauge_for(&self.component_gauges, &family, &label_names)?;
        let mut label_values: Vec<&str> = vec![node];
        label_values.extend(extra_labels.iter().map(|(_, v)| *v));
        gauge
            .get_metric_with_label_values(&label_values)
            .map_err(|e| Error::Config(format!("metrics label mismatch for {family}: {e}")))?
            .set(value);
        Ok(())
    }

    /// Sets or clears the `sichek_<item>_<error_name>` gauge (§6): `1.0`
    /// while the rule is abnormal, deleted once it returns to normal.
    pub fn set_checker_gauge(&self, item: &str, error_name: &str, node: &str, abnormal: bool) -> Result<()> {
        if error_name.is_empty() {
            return Ok(());
        }
        let family = format!(
            "sichek_{}_{}",
            sanitize_metric_name(item),
            sanitize_metric_name(error_name)
        );
        let gauge = self.gauge_for(&self.checker_gauges, &family, &["node"])?;
        if abnormal {
            gauge
                .get_metric_with_label_values(&[node])
                .map_err(|e| Error::Config(format!("metrics label mismatch for {family}: {e}")))?
                .set(1.0);
        } else {
            let _ = gauge.remove_label_values(&[node]);
        }
        Ok(())
    }

    fn gauge_for(
        &self,
        map: &DashMap<String, GaugeVec>,
        family: &str,
        label_names: &[&str],
    ) -> Result<GaugeVec> {
        if let Some(existing) = map.get(family) {
            return Ok(existing.clone());
        }
        let opts = Opts::new(family, format!("gpu-sentinel metric {family}"));
        let gauge = GaugeVec::new(opts, label_names)
            .map_err(|e| Error::Config(format!("failed to create gauge {family}: {e}")))?;
        self.registry
            .register(Box::new(gauge.clone()))
            .map_err(|e| Error::Config(format!("failed to register gauge {family}: {e}")))?;
        map.insert(family.to_string(), gauge.clone());
        Ok(gauge)
    }

    fn encode(&self) -> Vec<u8> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("text encoding never fails for well-formed gauge families");
        buffer
    }
}

#[derive(Clone)]
struct AppState {
    metrics: Arc<MetricsRegistry>,
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn router(metrics: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(AppState { metrics })
}

/// Serves `/metrics` and `/healthz` until `shutdown` is cancelled
/// (SPEC_FULL §10 graceful-shutdown addition).
pub async fn serve(bind: MetricsBind, metrics: Arc<MetricsRegistry>, shutdown: CancellationToken) -> Result<()> {
    let app = router(metrics);
    match bind {
        MetricsBind::Tcp(addr) => {
            info!(%addr, "metrics server listening on tcp");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
        }
        MetricsBind::Unix(path) => {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            info!(path = %path.display(), "metrics server listening on unix socket");
            let listener = tokio::net::UnixListener::bind(&path)?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
        }
    }
    Ok(())
}
