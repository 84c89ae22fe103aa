//! # Model
//!
//! The controller's view of the two resource kinds it reconciles, the key that
//! pairs them, and the events the watches deliver.
//!
//! `ConfigMapRef` and `SecretRef` are narrowed copies of the
//! `k8s_openapi` objects holding only what reconciliation reads, so the cache
//! and the reconcile rules can be exercised without an API server.

use crate::labels;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of one reconciliation unit: the namespace and name of the generated Secret
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub namespace: String,
    pub secret_name: String,
}

impl PairKey {
    pub fn new(namespace: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            secret_name: secret_name.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.secret_name)
    }
}

/// A source ConfigMap as observed by the watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMapRef {
    pub namespace: String,
    pub name: String,
    /// Opaque token that changes whenever the content changes (`metadata.resourceVersion`)
    pub version: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

impl ConfigMapRef {
    /// Narrow a `ConfigMap`; `None` when it has no name or namespace
    pub fn from_configmap(configmap: ConfigMap) -> Option<Self> {
        let ObjectMeta {
            name,
            namespace,
            resource_version,
            labels,
            ..
        } = configmap.metadata;

        Some(Self {
            namespace: namespace?,
            name: name?,
            version: resource_version.unwrap_or_default(),
            labels: labels.unwrap_or_default(),
            data: configmap.data.unwrap_or_default(),
        })
    }

    /// The pair this ConfigMap feeds, derived from its `target-secret` label
    pub fn pair_key(&self) -> Option<PairKey> {
        labels::target_secret(&self.labels).map(|secret| PairKey::new(&self.namespace, secret))
    }
}

/// A generated (or to-be-generated) Secret
#[derive(Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
    /// `metadata.resourceVersion` as reported by the API server
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

// Payload values are never printed.
impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRef")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("resource_version", &self.resource_version)
            .field("labels", &self.labels)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretRef {
    /// Narrow a `Secret`; `None` when it has no name or namespace
    ///
    /// `stringData` entries are folded into the payload as bytes and win over
    /// `data` entries of the same key, matching API server semantics.
    pub fn from_secret(secret: Secret) -> Option<Self> {
        let ObjectMeta {
            name,
            namespace,
            resource_version,
            labels,
            ..
        } = secret.metadata;

        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, ByteString(v))| (k, v))
            .collect();
        for (k, v) in secret.string_data.unwrap_or_default() {
            data.insert(k, v.into_bytes());
        }

        Some(Self {
            namespace: namespace?,
            name: name?,
            resource_version,
            labels: labels.unwrap_or_default(),
            data,
        })
    }

    /// The pair this Secret belongs to, derived from its own name
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.namespace, &self.name)
    }

    /// Content version this Secret was generated from
    pub fn source_version(&self) -> Option<&str> {
        labels::source_version(&self.labels)
    }

    /// Build the API body for a create or replace
    pub fn to_secret(&self) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: self.resource_version.clone(),
                labels: Some(self.labels.clone()),
                ..ObjectMeta::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(
                self.data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }
}

/// A single change observed by a watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "ADDED",
            WatchEvent::Modified(_) => "MODIFIED",
            WatchEvent::Deleted(_) => "DELETED",
        }
    }
}

/// An event from either watch, as delivered on the engine's channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    ConfigMap(WatchEvent<ConfigMapRef>),
    Secret(WatchEvent<SecretRef>),
}
