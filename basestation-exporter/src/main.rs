//! Prometheus exporter for base station telemetry.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use basestation_exporter::config::LogFormat;
use basestation_exporter::{
    Exporter, ExporterConfig, HttpServer, IngestServer, TelemetryStore,
};

/// Prometheus exporter for base station telemetry.
#[derive(Parser, Debug)]
#[command(name = "basestation-exporter")]
#[command(about = "Export base station telemetry received over TCP as Prometheus metrics")]
#[command(version)]
struct Args {
    /// TCP address the base station sends telemetry to [default: localhost:8080].
    tcp_address: Option<String>,

    /// Address to listen on for the web interface and metrics [default: localhost:9091].
    listen_address: Option<String>,

    /// Path under which to expose metrics [default: /metrics].
    metrics_path: Option<String>,

    /// Additional positional arguments are accepted and ignored.
    #[arg(hide = true)]
    ignored: Vec<String>,

    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // Positional arguments override the file
    let positional: Vec<String> = [
        args.tcp_address.clone(),
        args.listen_address.clone(),
        args.metrics_path.clone(),
    ]
    .into_iter()
    .flatten()
    .collect();
    config.apply_overrides(&positional);
    config.validate()?;

    // Initialize logging
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(config.logging.level.as_str());
    let log_level = level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("basestation_exporter={}", log_level).parse()?);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!(?positional, "Starting base station exporter");
    if !args.ignored.is_empty() {
        warn!(ignored = ?args.ignored, "Ignoring extra arguments");
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared state
    let store = Arc::new(TelemetryStore::new());
    let exporter = Arc::new(Exporter::new(
        config.prometheus.namespace.clone(),
        store.clone(),
    ));
    for desc in exporter.describe() {
        info!(metric = %desc.name, kind = desc.metric_type.as_str(), "Registered metric");
    }

    // Start TCP ingestion. A bind failure leaves the exporter running without it.
    let ingest = Arc::new(IngestServer::new(store.clone(), config.ingest.clone()));
    let ingest_server = ingest.clone();
    let ingest_shutdown = shutdown_rx.clone();
    let ingest_task = tokio::spawn(async move {
        if let Err(e) = ingest_server.run(ingest_shutdown).await {
            error!("TCP server error, telemetry ingestion disabled: {:#}", e);
        }
    });

    // Start HTTP server
    let http_server = HttpServer::new(
        exporter.clone(),
        store.clone(),
        config.prometheus.listen.clone(),
        config.prometheus.path.clone(),
    );
    let http_shutdown = shutdown_rx.clone();
    let mut http_task = tokio::spawn(async move { http_server.run(http_shutdown).await });

    // Wait for shutdown signal or HTTP failure
    let http_result = tokio::select! {
        result = &mut http_task => Some(result),
        _ = shutdown_signal() => None,
    };

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    let outcome = match http_result {
        Some(Ok(result)) => result,
        Some(Err(e)) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
        None => {
            // Wait for tasks to complete
            let _ = tokio::time::timeout(Duration::from_secs(5), async {
                let _ = http_task.await;
            })
            .await;
            Ok(())
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), ingest_task).await;

    // Print final stats
    let stats = ingest.stats();
    info!(
        connections_accepted = stats.connections_accepted,
        connections_rejected = stats.connections_rejected,
        updates_applied = stats.updates_applied,
        decode_failures = stats.decode_failures,
        scrapes = exporter.scrapes(),
        "Final statistics"
    );

    if let Err(e) = &outcome {
        error!("HTTP server error: {:#}", e);
    }
    info!("Exporter stopped");
    outcome
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down...");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
