//! # HTTP Server
//!
//! Metrics and probe endpoints for the controller pod.
//!
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe: 200 once both the ConfigMap and the
//!   Secret watch have delivered their initial list, otherwise 503 naming
//!   the watches still listing
//!
//! The server listens on `METRICS_PORT` (default 5000).

use anyhow::Context;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// A watch whose initial list gates readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListedWatch {
    ConfigMaps,
    Secrets,
}

impl ListedWatch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigMaps => "configmaps",
            Self::Secrets => "secrets",
        }
    }
}

/// Readiness shared between the watches and the probe handler
#[derive(Debug, Default)]
pub struct ServerState {
    configmaps_listed: AtomicBool,
    secrets_listed: AtomicBool,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `watch` delivered its initial list
    pub fn mark_listed(&self, watch: ListedWatch) {
        self.flag(watch).store(true, Ordering::Relaxed);
        debug!(watch = watch.as_str(), "Initial list complete");
    }

    /// Watches that have not finished their initial list yet
    pub fn pending(&self) -> Vec<ListedWatch> {
        [ListedWatch::ConfigMaps, ListedWatch::Secrets]
            .into_iter()
            .filter(|watch| !self.flag(*watch).load(Ordering::Relaxed))
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.pending().is_empty()
    }

    fn flag(&self, watch: ListedWatch) -> &AtomicBool {
        match watch {
            ListedWatch::ConfigMaps => &self.configmaps_listed,
            ListedWatch::Secrets => &self.secrets_listed,
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

pub async fn start_server(port: u16, state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {addr}"))?;

    info!(%addr, "HTTP server listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let metric_families = crate::metrics::REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let pending = state.pending();
    if pending.is_empty() {
        return (StatusCode::OK, "ready".to_string());
    }

    let names: Vec<&str> = pending.into_iter().map(ListedWatch::as_str).collect();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!("waiting for initial list: {}", names.join(", ")),
    )
}
