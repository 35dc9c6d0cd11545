//! HTTP server for the Prometheus metrics endpoint.
//!
//! Runs on a separate tokio task and serves `/metrics` for scraping.

use axum::{routing::get, Router};
use std::net::SocketAddr;

async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Run the HTTP server; binds `0.0.0.0:port`.
pub async fn run_http_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "metrics HTTP server listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind metrics server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "metrics server error");
    }
}
