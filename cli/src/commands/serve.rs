// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `clawster serve`: HTTP API plus the background usage meter.

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use clawster_core::application::BotLifecycleService;
use clawster_core::presentation::api;

use super::runtime::{build_service, load_config};

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Bind address (overrides spec.server.bind_address)
    #[arg(long, env = "CLAWSTER_HOST")]
    pub host: Option<String>,

    /// HTTP port (overrides spec.server.port)
    #[arg(long, env = "CLAWSTER_PORT")]
    pub port: Option<u16>,
}

pub async fn execute(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let spec = &config.spec;

    info!(
        billing = ?spec.billing.mode,
        storage = ?spec.storage.backend,
        image = %spec.provisioning.image,
        "Configuration loaded"
    );

    let metrics = &spec.observability.metrics;
    if metrics.enabled {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics.port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics on {}", metrics_addr);
    }

    let service = Arc::new(build_service(&config).await?);

    let meter = service.usage_meter();
    let meter_token = meter.shutdown_token();
    let meter_handle = if spec.metering.enabled {
        Some(meter.start())
    } else {
        info!("Usage metering disabled");
        None
    };

    let app = api::app(service.clone() as Arc<dyn BotLifecycleService>);

    let host = args.host.unwrap_or_else(|| spec.server.bind_address.clone());
    let port = args.port.unwrap_or(spec.server.port);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Clawster API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    meter_token.cancel();
    if let Some(handle) = meter_handle {
        if let Err(e) = handle.await {
            warn!("Usage meter task ended abnormally: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
