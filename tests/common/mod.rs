//! Common test utilities for integration tests
//!
//! Provides an in-memory `ClusterApi` and object builders shared by the
//! reconcile tests.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use async_trait::async_trait;
use env_secret_controller::cluster::{ClusterApi, ClusterError};
use env_secret_controller::model::{ConfigMapRef, SecretRef};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Secrets held in memory, with a log of write calls
#[derive(Debug, Default)]
pub struct MemoryCluster {
    secrets: Mutex<BTreeMap<(String, String), SecretRef>>,
    writes: Mutex<Vec<String>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, secret: SecretRef) {
        self.secrets
            .lock()
            .unwrap()
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<SecretRef> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Write calls as `"<verb> <namespace>/<name>"`
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn record(&self, verb: &str, namespace: &str, name: &str) {
        self.writes
            .lock()
            .unwrap()
            .push(format!("{verb} {namespace}/{name}"));
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<SecretRef, ClusterError> {
        self.secret(namespace, name)
            .ok_or_else(|| ClusterError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn create_secret(&self, secret: &SecretRef) -> Result<SecretRef, ClusterError> {
        self.record("create", &secret.namespace, &secret.name);
        self.seed(secret.clone());
        Ok(secret.clone())
    }

    async fn replace_secret(&self, secret: &SecretRef) -> Result<SecretRef, ClusterError> {
        self.record("replace", &secret.namespace, &secret.name);
        self.seed(secret.clone());
        Ok(secret.clone())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record("delete", namespace, name);
        self.secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

pub fn configmap(
    namespace: &str,
    name: &str,
    version: &str,
    labels: &[(&str, &str)],
    env: &str,
) -> ConfigMapRef {
    ConfigMapRef {
        namespace: namespace.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        data: BTreeMap::from([(".env".to_string(), env.to_string())]),
    }
}

pub fn key_secret(namespace: &str, name: &str, entry: &str, key: &str) -> SecretRef {
    SecretRef {
        namespace: namespace.to_string(),
        name: name.to_string(),
        resource_version: Some("1".to_string()),
        labels: BTreeMap::new(),
        data: BTreeMap::from([(entry.to_string(), key.as_bytes().to_vec())]),
    }
}
