//! HTTP server for the landing page and Prometheus metrics endpoint.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::exporter::SharedExporter;
use crate::telemetry::SharedStore;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    exporter: SharedExporter,
    store: SharedStore,
    landing_page: String,
}

/// Build the landing page linking to the metrics path.
fn landing_page(metrics_path: &str) -> String {
    format!(
        r#"<html>
<head>
    <title>Base station exporter</title>
</head>
<body>
    <h1>Prometheus exporter for sensor metrics from Base station</h1>
    <p><a href='{}'>Metrics</a></p>
</body>
</html>
"#,
        metrics_path.replace('\'', "%27")
    )
}

/// Create the HTTP router.
fn create_router(exporter: SharedExporter, store: SharedStore, metrics_path: &str) -> Router {
    let state = AppState {
        exporter,
        store,
        landing_page: landing_page(metrics_path),
    };

    Router::new()
        .route("/", get(index_handler))
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .fallback(index_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the landing page.
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(state.landing_page.clone())
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.exporter.render();
    debug!(bytes = body.len(), "Served scrape");

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.store.updates_applied() > 0 {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no telemetry received yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    exporter: SharedExporter,
    store: SharedStore,
    listen_addr: String,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        exporter: SharedExporter,
        store: SharedStore,
        listen_addr: String,
        metrics_path: String,
    ) -> Self {
        Self {
            exporter,
            store,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address and serve until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "Starting HTTP server"
        );

        let listener = TcpListener::bind(self.listen_addr.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.exporter, self.store, &self.metrics_path);

        if let Ok(addr) = listener.local_addr() {
            info!(
                %addr,
                path = %self.metrics_path,
                "HTTP server listening"
            );
        }

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
