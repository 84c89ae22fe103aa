//! Env Secret Controller Library
//!
//! Materializes labelled ConfigMaps carrying `.env` content (optionally with
//! encrypted values) into Kubernetes Secrets, and removes Secrets whose
//! source ConfigMap is gone.
//!
//! Tests are included in the module files (e.g., reconciler.rs).

pub mod backoff;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod labels;
pub mod materializer;
pub mod metrics;
pub mod model;
pub mod parser;
pub mod reconciler;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod watch;
