//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::backoff::{FibonacciBackoff, FixedBackoff, RestartBackoff};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between safety-net resync passes (seconds)
    /// Covers missed or out-of-order watch events
    pub resync_interval_secs: u64,
    /// Delay between watch registration and the first reconcile pass (seconds)
    pub startup_delay_secs: u64,
    /// Watch re-registration delay after a transport error (seconds)
    pub watch_restart_delay_secs: u64,
    /// Upper bound for a growing (Fibonacci) watch restart delay (seconds)
    /// When unset every restart waits `watch_restart_delay_secs`
    pub watch_restart_max_delay_secs: Option<u64>,
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Enable the metrics/probe server
    pub enable_metrics: bool,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            startup_delay_secs: DEFAULT_STARTUP_DELAY_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_max_delay_secs: None,
            watch_namespace: None,
            metrics_port: DEFAULT_METRICS_PORT,
            enable_metrics: true,
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            startup_delay_secs: env_var_or_default("STARTUP_DELAY_SECS", DEFAULT_STARTUP_DELAY_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_max_delay_secs: std::env::var("WATCH_RESTART_MAX_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.trim().is_empty()),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            enable_metrics: env_var_or_default_bool("ENABLE_METRICS", true),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }

    /// Get resync interval duration
    pub fn resync_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_secs(self.resync_interval_secs.max(1))
    }

    /// Get startup delay duration
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Build the restart policy for one watch
    pub fn watch_backoff(&self) -> Box<dyn RestartBackoff> {
        match self.watch_restart_max_delay_secs {
            Some(max) if max > self.watch_restart_delay_secs => Box::new(FibonacciBackoff::new(
                self.watch_restart_delay(),
                Duration::from_secs(max),
            )),
            _ => Box::new(FixedBackoff::new(self.watch_restart_delay())),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
