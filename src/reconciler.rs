//! # Reconciler
//!
//! Owns the pair cache and converges the cluster toward it.
//!
//! A reconcile pass visits every cache entry in key order and applies the
//! first matching rule:
//!
//! | ConfigMap | Secret | Action                                     |
//! |-----------|--------|--------------------------------------------|
//! | absent    | absent | drop the entry, no cluster call            |
//! | absent    | present| delete the orphaned Secret                 |
//! | present   | absent | materialize and create the Secret          |
//! | present   | present| replace the Secret if its version is stale |
//!
//! A failure on one entry is logged and counted, never aborting the pass.
//! The entry stays as it is and the next pass retries it.

use crate::cache::PairCache;
use crate::cluster::ClusterApi;
use crate::materializer::SecretMaterializer;
use crate::metrics;
use crate::model::{ConfigMapRef, PairKey, ResourceEvent, SecretRef};
use crate::parser::EnvParser;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Outcome counts of one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub created: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub dropped: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl PassSummary {
    /// Whether the pass wrote to the cluster
    pub fn changed(&self) -> bool {
        self.created + self.replaced + self.deleted > 0
    }
}

#[derive(Debug)]
pub struct Reconciler {
    cache: PairCache,
    cluster: Arc<dyn ClusterApi>,
    materializer: SecretMaterializer,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, parser: Arc<dyn EnvParser>) -> Self {
        Self {
            cache: PairCache::new(),
            materializer: SecretMaterializer::new(Arc::clone(&cluster), parser),
            cluster,
        }
    }

    /// Fold a watch event into the cache
    ///
    /// Returns `false` when the event was ignored.
    pub fn apply_event(&mut self, event: ResourceEvent) -> bool {
        let applied = self.cache.apply(event);
        metrics::set_cache_entries(self.cache.len());
        applied
    }

    pub fn cache(&self) -> &PairCache {
        &self.cache
    }

    /// Run one pass over every cache entry
    pub async fn reconcile_pass(&mut self) -> PassSummary {
        let span = info_span!("reconcile_pass", entries = self.cache.len());
        self.run_pass().instrument(span).await
    }

    async fn run_pass(&mut self) -> PassSummary {
        let start = Instant::now();
        let mut summary = PassSummary::default();

        for key in self.cache.keys() {
            let Some(entry) = self.cache.get(&key).cloned() else {
                continue;
            };

            match (entry.configmap, entry.secret) {
                (None, None) => {
                    debug!(key = %key, "Dropping empty cache entry");
                    self.cache.remove(&key);
                    summary.dropped += 1;
                }
                (None, Some(secret)) => self.delete_orphan(&key, &secret, &mut summary).await,
                (Some(configmap), None) => {
                    self.materialize(&key, &configmap, None, &mut summary).await;
                }
                (Some(configmap), Some(secret)) => {
                    if secret.source_version() == Some(configmap.version.as_str()) {
                        summary.unchanged += 1;
                    } else {
                        self.materialize(&key, &configmap, Some(&secret), &mut summary)
                            .await;
                    }
                }
            }
        }

        metrics::increment_reconcile_passes();
        metrics::observe_reconcile_pass_duration(start.elapsed().as_secs_f64());
        metrics::set_cache_entries(self.cache.len());

        if summary.changed() || summary.failed > 0 {
            info!(
                created = summary.created,
                replaced = summary.replaced,
                deleted = summary.deleted,
                failed = summary.failed,
                "Reconcile pass complete"
            );
        } else {
            debug!(
                unchanged = summary.unchanged,
                dropped = summary.dropped,
                "Reconcile pass complete, nothing to do"
            );
        }

        summary
    }

    async fn delete_orphan(&mut self, key: &PairKey, secret: &SecretRef, summary: &mut PassSummary) {
        match self.cluster.delete_secret(&secret.namespace, &secret.name).await {
            Ok(()) => {
                info!(
                    secret.namespace = secret.namespace.as_str(),
                    secret.name = secret.name.as_str(),
                    "Deleted orphaned Secret"
                );
                self.cache.remove(key);
                metrics::increment_secrets_deleted();
                summary.deleted += 1;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to delete orphaned Secret, will retry");
                metrics::increment_reconcile_errors("cluster_delete");
                summary.failed += 1;
            }
        }
    }

    async fn materialize(
        &mut self,
        key: &PairKey,
        configmap: &ConfigMapRef,
        existing: Option<&SecretRef>,
        summary: &mut PassSummary,
    ) {
        match self.materializer.materialize(configmap, existing).await {
            Ok(written) => {
                self.cache.set_secret(key, written);
                if existing.is_some() {
                    metrics::increment_secrets_updated();
                    summary.replaced += 1;
                } else {
                    metrics::increment_secrets_created();
                    summary.created += 1;
                }
            }
            Err(e) => {
                warn!(
                    key = %key,
                    configmap.name = configmap.name.as_str(),
                    error = %e,
                    "Failed to materialize Secret, will retry"
                );
                metrics::increment_reconcile_errors(e.kind());
                summary.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{Call, FakeCluster};
    use crate::cluster::Operation;
    use crate::labels;
    use crate::model::WatchEvent;
    use crate::parser::DotenvParser;
    use std::collections::BTreeMap;

    fn configmap(name: &str, target: &str, version: &str, env: &str) -> ConfigMapRef {
        ConfigMapRef {
            namespace: "default".to_string(),
            name: name.to_string(),
            version: version.to_string(),
            labels: BTreeMap::from([("target-secret".to_string(), target.to_string())]),
            data: BTreeMap::from([(".env".to_string(), env.to_string())]),
        }
    }

    fn orphan(name: &str) -> SecretRef {
        SecretRef {
            namespace: "default".to_string(),
            name: name.to_string(),
            resource_version: Some("7".to_string()),
            labels: labels::generated_labels("gone", "1"),
            data: BTreeMap::new(),
        }
    }

    fn cm_added(cm: ConfigMapRef) -> ResourceEvent {
        ResourceEvent::ConfigMap(WatchEvent::Added(cm))
    }

    fn setup() -> (Arc<FakeCluster>, Reconciler) {
        let cluster = Arc::new(FakeCluster::new());
        let reconciler = Reconciler::new(cluster.clone(), Arc::new(DotenvParser));
        (cluster, reconciler)
    }

    fn key(name: &str) -> PairKey {
        PairKey::new("default", name)
    }

    #[tokio::test]
    async fn test_new_configmap_creates_secret() {
        let (cluster, mut reconciler) = setup();
        reconciler.apply_event(cm_added(configmap("my-config", "my-secret", "12345", "KEY=value")));

        let summary = reconciler.reconcile_pass().await;

        assert_eq!(summary.created, 1);
        assert_eq!(cluster.calls(), vec![Call::Create("default/my-secret".to_string())]);
        let stored = cluster.get("default", "my-secret").unwrap();
        assert_eq!(stored.labels["source-configmap"], "my-config");
        assert_eq!(stored.labels["source-configmap-version"], "12345");
        assert_eq!(stored.data["KEY"], b"value".to_vec());

        let cached = reconciler.cache().get(&key("my-secret")).unwrap();
        assert_eq!(cached.secret.as_ref(), Some(&stored));
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let (cluster, mut reconciler) = setup();
        reconciler.apply_event(cm_added(configmap("my-config", "my-secret", "12345", "KEY=value")));
        reconciler.reconcile_pass().await;
        cluster.clear_calls();

        let summary = reconciler.reconcile_pass().await;

        assert_eq!(summary.unchanged, 1);
        assert!(!summary.changed());
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_modified_configmap_replaces_secret() {
        let (cluster, mut reconciler) = setup();
        reconciler.apply_event(cm_added(configmap("my-config", "my-secret", "12345", "KEY=value")));
        reconciler.reconcile_pass().await;
        cluster.clear_calls();

        reconciler.apply_event(ResourceEvent::ConfigMap(WatchEvent::Modified(configmap(
            "my-config",
            "my-secret",
            "67890",
            "KEY=changed",
        ))));
        let summary = reconciler.reconcile_pass().await;

        assert_eq!(summary.replaced, 1);
        assert_eq!(cluster.calls(), vec![Call::Replace("default/my-secret".to_string())]);
        let stored = cluster.get("default", "my-secret").unwrap();
        assert_eq!(stored.labels["source-configmap-version"], "67890");
        assert_eq!(stored.data["KEY"], b"changed".to_vec());
    }

    #[tokio::test]
    async fn test_secret_echo_from_watch_keeps_pair_converged() {
        let (cluster, mut reconciler) = setup();
        reconciler.apply_event(cm_added(configmap("my-config", "my-secret", "12345", "KEY=value")));
        reconciler.reconcile_pass().await;
        let stored = cluster.get("default", "my-secret").unwrap();
        cluster.clear_calls();

        reconciler.apply_event(ResourceEvent::Secret(WatchEvent::Added(stored)));
        reconciler.reconcile_pass().await;

        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_secret_without_version_label_is_replaced() {
        let (cluster, mut reconciler) = setup();
        let mut unversioned = orphan("my-secret");
        unversioned.labels.clear();
        cluster.insert(unversioned.clone());
        reconciler.apply_event(ResourceEvent::Secret(WatchEvent::Added(unversioned)));
        reconciler.apply_event(cm_added(configmap("my-config", "my-secret", "12345", "KEY=value")));

        reconciler.reconcile_pass().await;

        assert_eq!(cluster.calls(), vec![Call::Replace("default/my-secret".to_string())]);
    }

    #[tokio::test]
    async fn test_orphaned_secret_is_deleted() {
        let (cluster, mut reconciler) = setup();
        cluster.insert(orphan("my-secret"));
        reconciler.apply_event(ResourceEvent::Secret(WatchEvent::Added(orphan("my-secret"))));

        let summary = reconciler.reconcile_pass().await;

        assert_eq!(summary.deleted, 1);
        assert_eq!(cluster.calls(), vec![Call::Delete("default/my-secret".to_string())]);
        assert!(cluster.get("default", "my-secret").is_none());
        assert!(reconciler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_configmap_orphans_its_secret() {
        let (cluster, mut reconciler) = setup();
        let cm = configmap("my-config", "my-secret", "12345", "KEY=value");
        reconciler.apply_event(cm_added(cm.clone()));
        reconciler.reconcile_pass().await;
        cluster.clear_calls();

        reconciler.apply_event(ResourceEvent::ConfigMap(WatchEvent::Deleted(cm)));
        reconciler.reconcile_pass().await;

        assert_eq!(cluster.calls(), vec![Call::Delete("default/my-secret".to_string())]);
        assert!(reconciler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_empty_entry_dropped_without_cluster_calls() {
        let (cluster, mut reconciler) = setup();
        let cm = configmap("my-config", "my-secret", "12345", "KEY=value");
        reconciler.apply_event(cm_added(cm.clone()));
        reconciler.apply_event(ResourceEvent::ConfigMap(WatchEvent::Deleted(cm)));

        let summary = reconciler.reconcile_pass().await;

        assert_eq!(summary.dropped, 1);
        assert!(cluster.calls().is_empty());
        assert!(reconciler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_is_retried_next_pass() {
        let (cluster, mut reconciler) = setup();
        cluster.fail(Operation::Create, "default", "my-secret");
        reconciler.apply_event(cm_added(configmap("my-config", "my-secret", "12345", "KEY=value")));

        let summary = reconciler.reconcile_pass().await;
        assert_eq!(summary.failed, 1);
        let entry = reconciler.cache().get(&key("my-secret")).unwrap();
        assert!(entry.configmap.is_some());
        assert!(entry.secret.is_none());

        cluster.heal();
        cluster.clear_calls();
        let summary = reconciler.reconcile_pass().await;
        assert_eq!(summary.created, 1);
        assert_eq!(cluster.calls(), vec![Call::Create("default/my-secret".to_string())]);
    }

    #[tokio::test]
    async fn test_failed_orphan_delete_keeps_entry() {
        let (cluster, mut reconciler) = setup();
        cluster.insert(orphan("my-secret"));
        cluster.fail(Operation::Delete, "default", "my-secret");
        reconciler.apply_event(ResourceEvent::Secret(WatchEvent::Added(orphan("my-secret"))));

        let summary = reconciler.reconcile_pass().await;

        assert_eq!(summary.failed, 1);
        assert!(reconciler.cache().get(&key("my-secret")).unwrap().secret.is_some());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_pass() {
        let (cluster, mut reconciler) = setup();
        cluster.fail(Operation::Create, "default", "a-secret");
        reconciler.apply_event(cm_added(configmap("a-config", "a-secret", "1", "A=1")));
        reconciler.apply_event(cm_added(configmap("b-config", "b-secret", "1", "B=2")));

        let summary = reconciler.reconcile_pass().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(
            cluster.calls(),
            vec![
                Call::Create("default/a-secret".to_string()),
                Call::Create("default/b-secret".to_string()),
            ]
        );
        assert!(cluster.get("default", "b-secret").is_some());
    }

    #[tokio::test]
    async fn test_missing_source_key_writes_nothing() {
        let (cluster, mut reconciler) = setup();
        let mut cm = configmap("my-config", "my-secret", "1", "");
        cm.data.clear();
        reconciler.apply_event(cm_added(cm));

        let summary = reconciler.reconcile_pass().await;

        assert_eq!(summary.failed, 1);
        assert!(cluster.calls().is_empty());
        assert_eq!(reconciler.cache().len(), 1);
    }
}
