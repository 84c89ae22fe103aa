//! # Env Secret Controller
//!
//! A Kubernetes controller that turns labelled ConfigMaps into Secrets.
//!
//! ## Overview
//!
//! 1. **Watching ConfigMaps** - ConfigMaps labelled `target-secret=<name>` carry `.env` content
//! 2. **Decrypting values** - `encrypted:` values are decrypted with a key read from the
//!    Secret named by the `decryption-secret` label
//! 3. **Materializing Secrets** - The parsed variables become an Opaque Secret stamped with
//!    `source-configmap` and `source-configmap-version`
//! 4. **Garbage collection** - Generated Secrets whose ConfigMap is gone are deleted
//!
//! ## Configuration
//!
//! All settings come from environment variables, see `config::ControllerConfig`.
//! Log verbosity follows `RUST_LOG`; `LOG_FORMAT=json` switches to JSON output.

use anyhow::{Context, Result};
use env_secret_controller::config::ControllerConfig;
use env_secret_controller::constants::CONTROLLER_NAME;
use env_secret_controller::metrics;
use env_secret_controller::runtime::run_controller;
use env_secret_controller::server::{start_server, ServerState};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // kube's rustls transport needs a process-wide crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = ControllerConfig::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "env_secret_controller=info".into());
    if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting {}", CONTROLLER_NAME);
    info!(?config, "Loaded configuration");

    // Initialize metrics
    metrics::register_metrics()?;

    // Create server state
    let server_state = Arc::new(ServerState::new());

    // Start HTTP server for metrics and probes
    if config.enable_metrics {
        let server_state_clone = Arc::clone(&server_state);
        let server_port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(server_port, server_state_clone).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    run_controller(client, config, server_state).await
}
