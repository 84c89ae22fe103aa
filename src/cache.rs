//! # Pair Cache
//!
//! In-memory view of every (ConfigMap, Secret) pair, keyed by the generated
//! Secret's namespace and name and fed by the two watches.
//!
//! The cache holds the most recently observed object for each half. Entries
//! are created by the first event that references a key, replaced in place by
//! later events, and removed only by the reconciler (an entry with both halves
//! absent, or an orphaned Secret that has been deleted).

use crate::model::{ConfigMapRef, PairKey, ResourceEvent, SecretRef, WatchEvent};
use std::collections::BTreeMap;
use tracing::debug;

/// The last observed ConfigMap and Secret for one key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub configmap: Option<ConfigMapRef>,
    pub secret: Option<SecretRef>,
}

impl CacheEntry {
    /// Both halves absent; such an entry must be garbage-collected
    pub fn is_empty(&self) -> bool {
        self.configmap.is_none() && self.secret.is_none()
    }
}

/// Pair cache, iterated in key order
#[derive(Debug, Default)]
pub struct PairCache {
    entries: BTreeMap<PairKey, CacheEntry>,
}

impl PairCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a watch event
    ///
    /// Returns `false` when the event was ignored because no key could be
    /// derived from it (a ConfigMap without `target-secret`).
    pub fn apply(&mut self, event: ResourceEvent) -> bool {
        match event {
            ResourceEvent::ConfigMap(event) => self.apply_configmap_event(event),
            ResourceEvent::Secret(event) => {
                self.apply_secret_event(event);
                true
            }
        }
    }

    fn apply_configmap_event(&mut self, event: WatchEvent<ConfigMapRef>) -> bool {
        match event {
            WatchEvent::Added(configmap) | WatchEvent::Modified(configmap) => {
                let Some(key) = configmap.pair_key() else {
                    debug!(
                        configmap.namespace = configmap.namespace.as_str(),
                        configmap.name = configmap.name.as_str(),
                        "Ignoring ConfigMap without target-secret label"
                    );
                    return false;
                };
                // A relabelled ConfigMap leaves the pair it used to feed
                self.release_configmap(&configmap, Some(&key));
                self.entries.entry(key).or_default().configmap = Some(configmap);
                true
            }
            WatchEvent::Deleted(configmap) => {
                self.release_configmap(&configmap, None);
                true
            }
        }
    }

    fn apply_secret_event(&mut self, event: WatchEvent<SecretRef>) {
        match event {
            WatchEvent::Added(secret) | WatchEvent::Modified(secret) => {
                let key = secret.pair_key();
                self.entries.entry(key).or_default().secret = Some(secret);
            }
            WatchEvent::Deleted(secret) => {
                if let Some(entry) = self.entries.get_mut(&secret.pair_key()) {
                    entry.secret = None;
                }
            }
        }
    }

    /// Clear `configmap` from every entry holding it, except the one at `keep`
    fn release_configmap(&mut self, configmap: &ConfigMapRef, keep: Option<&PairKey>) {
        for (key, entry) in &mut self.entries {
            if Some(key) == keep {
                continue;
            }
            let held = entry.configmap.as_ref().is_some_and(|held| {
                held.namespace == configmap.namespace && held.name == configmap.name
            });
            if held {
                entry.configmap = None;
            }
        }
    }

    /// Snapshot of the current keys, in iteration order
    pub fn keys(&self) -> Vec<PairKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn get(&self, key: &PairKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store the Secret reported by the API server after a create or replace
    pub fn set_secret(&mut self, key: &PairKey, secret: SecretRef) {
        self.entries.entry(key.clone()).or_default().secret = Some(secret);
    }

    pub fn remove(&mut self, key: &PairKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configmap(name: &str, target: &str, version: &str) -> ConfigMapRef {
        ConfigMapRef {
            namespace: "default".to_string(),
            name: name.to_string(),
            version: version.to_string(),
            labels: BTreeMap::from([("target-secret".to_string(), target.to_string())]),
            data: BTreeMap::from([(".env".to_string(), "KEY=value".to_string())]),
        }
    }

    fn secret(name: &str) -> SecretRef {
        SecretRef {
            namespace: "default".to_string(),
            name: name.to_string(),
            resource_version: Some("1".to_string()),
            labels: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }

    fn key(name: &str) -> PairKey {
        PairKey::new("default", name)
    }

    #[test]
    fn test_configmap_added_creates_entry() {
        let mut cache = PairCache::new();
        assert!(cache.apply(ResourceEvent::ConfigMap(WatchEvent::Added(configmap(
            "my-config",
            "my-secret",
            "1"
        )))));

        let entry = cache.get(&key("my-secret")).unwrap();
        assert_eq!(entry.configmap.as_ref().unwrap().name, "my-config");
        assert!(entry.secret.is_none());
    }

    #[test]
    fn test_configmap_modified_replaces_whole_object() {
        let mut cache = PairCache::new();
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Added(configmap(
            "my-config",
            "my-secret",
            "1",
        ))));
        let mut modified = configmap("my-config", "my-secret", "2");
        modified.data.clear();
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Modified(modified)));

        let held = cache.get(&key("my-secret")).unwrap().configmap.clone().unwrap();
        assert_eq!(held.version, "2");
        assert!(held.data.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_configmap_without_target_is_ignored() {
        let mut cache = PairCache::new();
        let mut unlabelled = configmap("my-config", "my-secret", "1");
        unlabelled.labels.clear();

        assert!(!cache.apply(ResourceEvent::ConfigMap(WatchEvent::Added(unlabelled))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_configmap_deleted_clears_half_but_keeps_entry() {
        let mut cache = PairCache::new();
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Added(configmap(
            "my-config",
            "my-secret",
            "1",
        ))));
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Deleted(configmap(
            "my-config",
            "my-secret",
            "1",
        ))));

        let entry = cache.get(&key("my-secret")).unwrap();
        assert!(entry.is_empty());
    }

    #[test]
    fn test_secret_events_keyed_by_own_name() {
        let mut cache = PairCache::new();
        cache.apply(ResourceEvent::Secret(WatchEvent::Added(secret("my-secret"))));
        assert!(cache.get(&key("my-secret")).unwrap().secret.is_some());

        cache.apply(ResourceEvent::Secret(WatchEvent::Deleted(secret("my-secret"))));
        assert!(cache.get(&key("my-secret")).unwrap().is_empty());
    }

    #[test]
    fn test_secret_modified_replaces_held_secret() {
        let mut cache = PairCache::new();
        cache.apply(ResourceEvent::Secret(WatchEvent::Added(secret("my-secret"))));
        let mut modified = secret("my-secret");
        modified.resource_version = Some("2".to_string());
        cache.apply(ResourceEvent::Secret(WatchEvent::Modified(modified)));

        let held = cache.get(&key("my-secret")).unwrap().secret.clone().unwrap();
        assert_eq!(held.resource_version.as_deref(), Some("2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_secret_deleted_for_unknown_key_creates_nothing() {
        let mut cache = PairCache::new();
        cache.apply(ResourceEvent::Secret(WatchEvent::Deleted(secret("ghost"))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_both_halves_share_one_entry() {
        let mut cache = PairCache::new();
        cache.apply(ResourceEvent::Secret(WatchEvent::Added(secret("my-secret"))));
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Added(configmap(
            "my-config",
            "my-secret",
            "1",
        ))));

        assert_eq!(cache.len(), 1);
        let entry = cache.get(&key("my-secret")).unwrap();
        assert!(entry.configmap.is_some());
        assert!(entry.secret.is_some());
    }

    #[test]
    fn test_relabelled_configmap_moves_to_new_key() {
        let mut cache = PairCache::new();
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Added(configmap(
            "my-config",
            "old-secret",
            "1",
        ))));
        cache.apply(ResourceEvent::Secret(WatchEvent::Added(secret("old-secret"))));
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Modified(configmap(
            "my-config",
            "new-secret",
            "2",
        ))));

        let old = cache.get(&key("old-secret")).unwrap();
        assert!(old.configmap.is_none());
        assert!(old.secret.is_some());
        assert!(cache.get(&key("new-secret")).unwrap().configmap.is_some());
    }

    #[test]
    fn test_deleting_one_of_two_configmaps_keeps_the_other() {
        let mut cache = PairCache::new();
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Added(configmap(
            "first",
            "my-secret",
            "1",
        ))));
        // Last observed wins
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Added(configmap(
            "second",
            "my-secret",
            "2",
        ))));
        cache.apply(ResourceEvent::ConfigMap(WatchEvent::Deleted(configmap(
            "first",
            "my-secret",
            "1",
        ))));

        let held = cache.get(&key("my-secret")).unwrap().configmap.clone().unwrap();
        assert_eq!(held.name, "second");
    }

    #[test]
    fn test_keys_are_ordered() {
        let mut cache = PairCache::new();
        for name in ["c", "a", "b"] {
            cache.apply(ResourceEvent::Secret(WatchEvent::Added(secret(name))));
        }
        assert_eq!(cache.keys(), vec![key("a"), key("b"), key("c")]);
    }
}
