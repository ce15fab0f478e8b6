//! spt-dashboard - CRM dashboard service
//!
//! Serves aggregated deal and account metrics over HTTP and keeps them fresh
//! with a background refresh against the CRM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use spt_common::config::ConfigResolver;
use spt_common::logging::init_logging;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use spt_dashboard::crm::{RecordSource, ZohoClient};
use spt_dashboard::services::{spawn_refresh_scheduler, RefreshCoordinator};
use spt_dashboard::AppState;

/// Command-line arguments for spt-dashboard
#[derive(Parser, Debug)]
#[command(name = "spt-dashboard")]
#[command(about = "CRM dashboard data service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "SPT_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConfigResolver::new("spt-dashboard")
        .with_cli_path(args.config)
        .load()
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        build_timestamp = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting spt-dashboard"
    );

    config.validate(true).context("Invalid configuration")?;
    config
        .ensure_data_dirs()
        .context("Failed to create data directories")?;

    let source: Arc<dyn RecordSource> =
        Arc::new(ZohoClient::new(&config.crm).context("Failed to build CRM client")?);
    let coordinator = Arc::new(RefreshCoordinator::from_config(source, &config));

    info!(
        current_data = %config.data.current_data_path.display(),
        refresh_interval_hours = config.data.refresh_interval_hours,
        archive_retention_days = config.data.archive_retention_days,
        "Refresh coordinator ready"
    );

    let cancel = CancellationToken::new();
    let scheduler = spawn_refresh_scheduler(
        Arc::clone(&coordinator),
        config.data.refresh_interval(),
        cancel.clone(),
    );

    let app = spt_dashboard::build_router(AppState::new(coordinator));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server.host))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/api/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    scheduler.await.context("Refresh scheduler panicked")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
