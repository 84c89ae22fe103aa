//! # Secret Materializer
//!
//! Turns a source ConfigMap into its generated Secret and writes it.
//!
//! ## Flow
//!
//! 1. Read the `source-key` entry (default `.env`) from the ConfigMap data
//! 2. If the ConfigMap names a `decryption-secret`, read the key from that
//!    Secret's `decryption-secret-key` entry (default `CONFIG_DECRYPTION_KEY`)
//! 3. Parse and decrypt the content
//! 4. Build the Secret body, stamped with `source-configmap` and
//!    `source-configmap-version`
//! 5. Create it, or replace the existing Secret in place
//!
//! Any failure aborts before the write, so a failed materialization never
//! leaves a partially written Secret behind.
//!
//! **SECURITY**: the decryption Secret is looked up by name in the ConfigMap's
//! namespace with no check tying it to the ConfigMap. Anyone who can label a
//! ConfigMap can have any same-namespace Secret entry used as a key.

use crate::cluster::{ClusterApi, ClusterError};
use crate::labels::{self, DecryptionRef, SourceLabels};
use crate::model::{ConfigMapRef, SecretRef};
use crate::parser::{EnvParser, ParseError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("ConfigMap {namespace}/{name} has no target-secret label")]
    MissingTargetSecret { namespace: String, name: String },
    #[error("ConfigMap {namespace}/{name} has no data entry '{key}'")]
    MissingSourceKey {
        namespace: String,
        name: String,
        key: String,
    },
    #[error("decryption Secret {namespace}/{secret} has no entry '{key}'")]
    MissingDecryptionKey {
        namespace: String,
        secret: String,
        key: String,
    },
    #[error("failed to read decryption Secret: {0}")]
    ClusterRead(#[source] ClusterError),
    #[error("failed to decrypt ConfigMap {namespace}/{name}: {source}")]
    DecryptionFailed {
        namespace: String,
        name: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to write Secret: {0}")]
    ClusterWrite(#[source] ClusterError),
}

impl MaterializeError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            MaterializeError::MissingTargetSecret { .. } => "missing_target_secret",
            MaterializeError::MissingSourceKey { .. } => "missing_source_key",
            MaterializeError::MissingDecryptionKey { .. } => "missing_decryption_key",
            MaterializeError::ClusterRead(_) => "cluster_read",
            MaterializeError::DecryptionFailed { .. } => "decryption_failed",
            MaterializeError::ClusterWrite(_) => "cluster_write",
        }
    }
}

/// Builds and writes generated Secrets
#[derive(Clone)]
pub struct SecretMaterializer {
    cluster: Arc<dyn ClusterApi>,
    parser: Arc<dyn EnvParser>,
}

impl fmt::Debug for SecretMaterializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterializer").finish_non_exhaustive()
    }
}

impl SecretMaterializer {
    pub fn new(cluster: Arc<dyn ClusterApi>, parser: Arc<dyn EnvParser>) -> Self {
        Self { cluster, parser }
    }

    /// Build the Secret for `configmap` and write it
    ///
    /// With `existing`, the Secret is replaced in place under the same
    /// name; otherwise it is created. Returns the Secret as stored by the
    /// API server.
    pub async fn materialize(
        &self,
        configmap: &ConfigMapRef,
        existing: Option<&SecretRef>,
    ) -> Result<SecretRef, MaterializeError> {
        let body = self.build(configmap).await?;

        match existing {
            Some(existing) => {
                // Carry over the identity; the body itself is rebuilt from scratch
                let body = SecretRef {
                    namespace: existing.namespace.clone(),
                    name: existing.name.clone(),
                    ..body
                };
                let replaced = self
                    .cluster
                    .replace_secret(&body)
                    .await
                    .map_err(MaterializeError::ClusterWrite)?;
                info!(
                    secret.namespace = replaced.namespace.as_str(),
                    secret.name = replaced.name.as_str(),
                    configmap.name = configmap.name.as_str(),
                    previous_version = existing.source_version().unwrap_or("<none>"),
                    version = configmap.version.as_str(),
                    "Replaced Secret"
                );
                Ok(replaced)
            }
            None => {
                let created = self
                    .cluster
                    .create_secret(&body)
                    .await
                    .map_err(MaterializeError::ClusterWrite)?;
                info!(
                    secret.namespace = created.namespace.as_str(),
                    secret.name = created.name.as_str(),
                    configmap.name = configmap.name.as_str(),
                    version = configmap.version.as_str(),
                    "Created Secret"
                );
                Ok(created)
            }
        }
    }

    /// Build the Secret body for `configmap` without writing it
    pub async fn build(&self, configmap: &ConfigMapRef) -> Result<SecretRef, MaterializeError> {
        let source = SourceLabels::from_labels(&configmap.labels).ok_or_else(|| {
            MaterializeError::MissingTargetSecret {
                namespace: configmap.namespace.clone(),
                name: configmap.name.clone(),
            }
        })?;

        let content = configmap.data.get(&source.source_key).ok_or_else(|| {
            MaterializeError::MissingSourceKey {
                namespace: configmap.namespace.clone(),
                name: configmap.name.clone(),
                key: source.source_key.clone(),
            }
        })?;

        let key = match &source.decryption {
            Some(decryption) => Some(
                self.resolve_decryption_key(&configmap.namespace, decryption)
                    .await?,
            ),
            None => None,
        };

        let values = self
            .parser
            .parse(content, key.as_ref().map(|k| k.as_str()))
            .map_err(|source| MaterializeError::DecryptionFailed {
                namespace: configmap.namespace.clone(),
                name: configmap.name.clone(),
                source,
            })?;
        debug!(
            configmap.namespace = configmap.namespace.as_str(),
            configmap.name = configmap.name.as_str(),
            entries = values.len(),
            encrypted = key.is_some(),
            "Parsed ConfigMap content"
        );

        let data: BTreeMap<String, Vec<u8>> = values
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect();

        Ok(SecretRef {
            namespace: configmap.namespace.clone(),
            name: source.target_secret,
            resource_version: None,
            labels: labels::generated_labels(&configmap.name, &configmap.version),
            data,
        })
    }

    /// Read the decryption key from a Secret in `namespace`
    ///
    /// Surrounding whitespace (typically a trailing newline) is stripped.
    async fn resolve_decryption_key(
        &self,
        namespace: &str,
        decryption: &DecryptionRef,
    ) -> Result<Zeroizing<String>, MaterializeError> {
        let secret = self
            .cluster
            .read_secret(namespace, &decryption.secret_name)
            .await
            .map_err(MaterializeError::ClusterRead)?;

        let raw = secret.data.get(&decryption.secret_key).ok_or_else(|| {
            MaterializeError::MissingDecryptionKey {
                namespace: namespace.to_string(),
                secret: decryption.secret_name.clone(),
                key: decryption.secret_key.clone(),
            }
        })?;

        let key = std::str::from_utf8(raw).map_err(|e| MaterializeError::DecryptionFailed {
            namespace: namespace.to_string(),
            name: decryption.secret_name.clone(),
            source: ParseError::InvalidKey(format!("key is not valid UTF-8: {e}")),
        })?;

        Ok(Zeroizing::new(key.trim().to_string()))
    }
}
