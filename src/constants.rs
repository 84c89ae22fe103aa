//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager / user agent name used for writes against the API server
pub const CONTROLLER_NAME: &str = "env-secret-controller";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default interval between safety-net resync passes (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Default delay between watch registration and the first reconcile pass (seconds)
/// Gives the initial watch snapshots time to populate the cache
pub const DEFAULT_STARTUP_DELAY_SECS: u64 = 5;

/// Default delay before re-registering a watch after a transport error (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 1;

/// Capacity of the engine's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Label on a ConfigMap naming the Secret to produce
pub const LABEL_TARGET_SECRET: &str = "target-secret";

/// Label on a ConfigMap naming the data entry holding the encrypted content
pub const LABEL_SOURCE_KEY: &str = "source-key";

/// Label on a ConfigMap naming a Secret that holds the decryption key
pub const LABEL_DECRYPTION_SECRET: &str = "decryption-secret";

/// Label on a ConfigMap naming the entry inside the decryption Secret
pub const LABEL_DECRYPTION_SECRET_KEY: &str = "decryption-secret-key";

/// Label on a generated Secret naming the originating ConfigMap
pub const LABEL_SOURCE_CONFIGMAP: &str = "source-configmap";

/// Label on a generated Secret holding the ConfigMap's content version at generation time
pub const LABEL_SOURCE_CONFIGMAP_VERSION: &str = "source-configmap-version";

/// Data entry read from the ConfigMap when `source-key` is not set
pub const DEFAULT_SOURCE_KEY: &str = ".env";

/// Entry read from the decryption Secret when `decryption-secret-key` is not set
pub const DEFAULT_DECRYPTION_SECRET_KEY: &str = "CONFIG_DECRYPTION_KEY";

/// Prefix marking an encrypted value inside `.env` content
pub const ENCRYPTED_VALUE_PREFIX: &str = "encrypted:";
