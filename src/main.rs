//! Daemon entry point: loads config, starts the metrics/liveness HTTP
//! surface, and waits for shutdown.
//!
//! Concrete components (which hardware to probe, with which checkers)
//! are deliberately out of scope for this crate (§1 of the design doc)
//! — a deployment wires its own [`gpu_sentinel::collector::Collector`]
//! and [`gpu_sentinel::checker::Checker`] implementations into
//! [`gpu_sentinel::runtime::ComponentRuntime`] and registers them before
//! calling into the scaffolding set up here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gpu_sentinel::config::DaemonConfig;
use gpu_sentinel::metrics::{resolve_bind, MetricsRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./sichek.yaml".to_string());

    let daemon_config = match DaemonConfig::load_from_path(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %config_path, error = %e, "no user config found, continuing with defaults");
            DaemonConfig::default()
        }
    };

    if let Some(location) = &daemon_config.spec_catalog {
        info!(location = %location, "loading spec catalog");
        gpu_sentinel::config::SpecCatalog::load(location)
            .await
            .with_context(|| format!("loading spec catalog from {location}"))?;
    }

    let metrics = Arc::new(MetricsRegistry::new());
    let bind = resolve_bind(None, std::env::var("GPU_SENTINEL_METRICS_SOCKET").ok().map(PathBuf::from));

    let shutdown = CancellationToken::new();
    let metrics_shutdown = shutdown.clone();
    let metrics_handle = tokio::spawn(async move {
        if let Err(e) = gpu_sentinel::metrics::serve(bind, metrics, metrics_shutdown).await {
            warn!(error = %e, "metrics server exited with an error");
        }
    });

    info!("gpu-sentinel started; no components registered by this generic entry point");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");
    shutdown.cancel();
    let _ = metrics_handle.await;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
