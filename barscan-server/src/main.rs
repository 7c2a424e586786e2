// barscan-server binary: load settings and models, then serve the HTTP API

use anyhow::Context;
use barscan_eye::ModelManager;
use barscan_server::http::{create_router, ApiState};
use barscan_server::logging::init_tracing;
use barscan_server::metrics::{monitor_ram, Metrics};
use barscan_server::settings::AppSettings;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "barscan-server")]
#[command(about = "Barcode detection and recognition inference service", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = AppSettings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    settings.validate()?;

    init_tracing(&settings.log, &settings.server.component_name)?;

    info!(
        "Starting {} v{}",
        settings.server.component_name, settings.server.service_version
    );

    let manager = ModelManager::new(Arc::new(settings.models.clone()));
    let segmenter = manager.segmenter().map_err(|e| {
        error!("Failed to load segmentation model: {}", e);
        e
    })?;
    let recognizer = manager.recognizer().map_err(|e| {
        error!("Failed to load recognizer model: {}", e);
        e
    })?;
    info!("Models ready");

    let metrics = Metrics::new(settings.server.filter_unhandled_paths)?;
    tokio::spawn(monitor_ram(
        metrics.clone(),
        Duration::from_secs(settings.server.ram_check_interval_secs),
    ));

    let state = ApiState::new(segmenter, recognizer, metrics);
    let app = create_router(state, settings.server.max_upload_bytes);

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
