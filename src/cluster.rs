//! # Cluster API
//!
//! The Secret operations the controller issues against the API server.
//!
//! The trait lets the reconciler run against an in-memory cluster in tests;
//! `KubeCluster` is the production implementation on top of `kube::Api<Secret>`.

use crate::constants::CONTROLLER_NAME;
use crate::metrics;
use crate::model::SecretRef;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// The kind of call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Create,
    Replace,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Replace => "replace",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Secret {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("{operation} of Secret {namespace}/{name} failed: {message}")]
    Api {
        operation: Operation,
        namespace: String,
        name: String,
        message: String,
    },
}

impl ClusterError {
    pub fn api(operation: Operation, namespace: &str, name: &str, message: impl fmt::Display) -> Self {
        ClusterError::Api {
            operation,
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

/// Secret operations against the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync + fmt::Debug {
    /// Read a Secret
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<SecretRef, ClusterError>;

    /// Create a Secret, returning it as stored by the API server
    async fn create_secret(&self, secret: &SecretRef) -> Result<SecretRef, ClusterError>;

    /// Fully replace an existing Secret, returning it as stored by the API server
    async fn replace_secret(&self, secret: &SecretRef) -> Result<SecretRef, ClusterError>;

    /// Delete a Secret; a Secret that is already gone counts as deleted
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// `ClusterApi` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        }
    }
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

fn narrow(operation: Operation, namespace: &str, name: &str, secret: Secret) -> Result<SecretRef, ClusterError> {
    SecretRef::from_secret(secret).ok_or_else(|| {
        ClusterError::api(
            operation,
            namespace,
            name,
            "response is missing name or namespace",
        )
    })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<SecretRef, ClusterError> {
        let start = Instant::now();
        let result = self.secrets(namespace).get(name).await;
        metrics::observe_api_call(Operation::Read, start.elapsed().as_secs_f64());

        match result {
            Ok(secret) => narrow(Operation::Read, namespace, name, secret),
            Err(e) if is_not_found(&e) => Err(ClusterError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(ClusterError::api(Operation::Read, namespace, name, e)),
        }
    }

    async fn create_secret(&self, secret: &SecretRef) -> Result<SecretRef, ClusterError> {
        let start = Instant::now();
        let result = self
            .secrets(&secret.namespace)
            .create(&Self::post_params(), &secret.to_secret())
            .await;
        metrics::observe_api_call(Operation::Create, start.elapsed().as_secs_f64());

        let created = result
            .map_err(|e| ClusterError::api(Operation::Create, &secret.namespace, &secret.name, e))?;
        narrow(Operation::Create, &secret.namespace, &secret.name, created)
    }

    async fn replace_secret(&self, secret: &SecretRef) -> Result<SecretRef, ClusterError> {
        let start = Instant::now();
        let result = self
            .secrets(&secret.namespace)
            .replace(&secret.name, &Self::post_params(), &secret.to_secret())
            .await;
        metrics::observe_api_call(Operation::Replace, start.elapsed().as_secs_f64());

        let replaced = result.map_err(|e| {
            ClusterError::api(Operation::Replace, &secret.namespace, &secret.name, e)
        })?;
        narrow(Operation::Replace, &secret.namespace, &secret.name, replaced)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let start = Instant::now();
        let result = self
            .secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await;
        metrics::observe_api_call(Operation::Delete, start.elapsed().as_secs_f64());

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(
                    secret.namespace = namespace,
                    secret.name = name,
                    "Secret already deleted"
                );
                Ok(())
            }
            Err(e) => Err(ClusterError::api(Operation::Delete, namespace, name, e)),
        }
    }
}
