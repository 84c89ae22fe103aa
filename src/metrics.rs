//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `env_secret_reconcile_passes_total` - Total number of reconcile passes
//! - `env_secret_reconcile_pass_duration_seconds` - Duration of reconcile passes
//! - `env_secret_reconcile_errors_total{kind}` - Per-entry reconcile failures by error kind
//! - `env_secret_secrets_created_total` - Secrets created
//! - `env_secret_secrets_updated_total` - Secrets replaced because their ConfigMap changed
//! - `env_secret_secrets_deleted_total` - Orphaned Secrets deleted
//! - `env_secret_cache_entries` - Current number of pair cache entries
//! - `env_secret_watch_restarts_total{resource}` - Watch re-registrations after transport errors
//! - `env_secret_api_call_duration_seconds{operation}` - Duration of Secret API calls

use crate::cluster::Operation;
use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILE_PASSES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "env_secret_reconcile_passes_total",
        "Total number of reconcile passes",
    )
    .expect("Failed to create RECONCILE_PASSES_TOTAL metric - this should never happen")
});

static RECONCILE_PASS_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "env_secret_reconcile_pass_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
    )
    .expect("Failed to create RECONCILE_PASS_DURATION metric - this should never happen")
});

static RECONCILE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "env_secret_reconcile_errors_total",
            "Total number of per-entry reconcile failures",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILE_ERRORS_TOTAL metric - this should never happen")
});

static SECRETS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "env_secret_secrets_created_total",
        "Total number of Secrets created",
    )
    .expect("Failed to create SECRETS_CREATED_TOTAL metric - this should never happen")
});

static SECRETS_UPDATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "env_secret_secrets_updated_total",
        "Total number of Secrets replaced after a ConfigMap change",
    )
    .expect("Failed to create SECRETS_UPDATED_TOTAL metric - this should never happen")
});

static SECRETS_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "env_secret_secrets_deleted_total",
        "Total number of orphaned Secrets deleted",
    )
    .expect("Failed to create SECRETS_DELETED_TOTAL metric - this should never happen")
});

static CACHE_ENTRIES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "env_secret_cache_entries",
        "Current number of pair cache entries",
    )
    .expect("Failed to create CACHE_ENTRIES metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "env_secret_watch_restarts_total",
            "Total number of watch re-registrations after transport errors",
        ),
        &["resource"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

static API_CALL_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "env_secret_api_call_duration_seconds",
            "Duration of Secret API calls in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["operation"],
    )
    .expect("Failed to create API_CALL_DURATION metric - this should never happen")
});

/// Register all metrics with the registry
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILE_PASSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILE_PASS_DURATION.clone()))?;
    REGISTRY.register(Box::new(RECONCILE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_UPDATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHE_ENTRIES.clone()))?;
    REGISTRY.register(Box::new(WATCH_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(API_CALL_DURATION.clone()))?;
    Ok(())
}

pub fn increment_reconcile_passes() {
    RECONCILE_PASSES_TOTAL.inc();
}

pub fn observe_reconcile_pass_duration(duration: f64) {
    RECONCILE_PASS_DURATION.observe(duration);
}

pub fn increment_reconcile_errors(kind: &str) {
    RECONCILE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_secrets_created() {
    SECRETS_CREATED_TOTAL.inc();
}

pub fn increment_secrets_updated() {
    SECRETS_UPDATED_TOTAL.inc();
}

pub fn increment_secrets_deleted() {
    SECRETS_DELETED_TOTAL.inc();
}

pub fn set_cache_entries(count: usize) {
    CACHE_ENTRIES.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn increment_watch_restarts(resource: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[resource]).inc();
}

pub fn observe_api_call(operation: Operation, duration: f64) {
    API_CALL_DURATION
        .with_label_values(&[operation.as_str()])
        .observe(duration);
}
