//! # Rhea REST Gateway
//!
//! The REST sidecar next to the MCP transports: file upload and download
//! against the shared object store, plus the Prometheus metrics exposition.
//!
//! - `POST /upload` — chunked body with an `x-filename` header; the bytes
//!   are wrapped in an artifact envelope and stored behind one handle,
//!   returned as JSON.
//! - `GET /download?key=HANDLE` — streams the envelope's bytes back with a
//!   `Content-Disposition` naming the original filename.
//! - `GET /metrics` — Prometheus text exposition of the server's counters
//!   and histograms.

pub mod routes;

pub use routes::{GatewayState, router};

use std::net::SocketAddr;

/// Bind and serve the gateway until the process exits.
pub async fn serve(addr: SocketAddr, router: axum::Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "REST gateway listening");
    axum::serve(listener, router).await?;
    Ok(())
}
