//! Liveness HTTP endpoint.
//!
//! Unrelated to session state; it only proves the process is up.

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn root() -> &'static str {
    "running."
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "filebot",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the health router.
pub fn build_router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

/// Serve the health router on `addr` until `shutdown` fires.
pub async fn serve_health(addr: SocketAddr, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health endpoint listening");
    axum::serve(listener, build_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
