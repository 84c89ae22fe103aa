//! # Watches
//!
//! One long-lived watch per resource kind, each feeding the engine's event
//! channel.
//!
//! - ConfigMaps are watched with the `target-secret` label selector
//! - Secrets are watched with the `source-configmap` label selector
//!
//! Watch objects are narrowed to `ConfigMapRef`/`SecretRef` before they leave
//! this module. When the stream fails the watch is re-registered after the
//! configured restart delay; the relist that follows is diffed against the
//! objects seen before, so deletions missed while disconnected still surface
//! as `DELETED` events.

use crate::backoff::RestartBackoff;
use crate::labels;
use crate::metrics;
use crate::model::{ConfigMapRef, ResourceEvent, SecretRef, WatchEvent};
use futures::{pin_mut, Stream, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A resource kind the controller watches
pub trait WatchedKind:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Name used in logs and metrics
    const KIND: &'static str;

    /// The controller's view of the object
    type Narrowed: Clone + fmt::Debug + Send + Sync + 'static;

    fn label_selector() -> &'static str;

    fn narrow(self) -> Option<Self::Narrowed>;

    fn wrap(event: WatchEvent<Self::Narrowed>) -> ResourceEvent;
}

impl WatchedKind for ConfigMap {
    const KIND: &'static str = "configmap";
    type Narrowed = ConfigMapRef;

    fn label_selector() -> &'static str {
        labels::configmap_selector()
    }

    fn narrow(self) -> Option<ConfigMapRef> {
        ConfigMapRef::from_configmap(self)
    }

    fn wrap(event: WatchEvent<ConfigMapRef>) -> ResourceEvent {
        ResourceEvent::ConfigMap(event)
    }
}

impl WatchedKind for Secret {
    const KIND: &'static str = "secret";
    type Narrowed = SecretRef;

    fn label_selector() -> &'static str {
        labels::secret_selector()
    }

    fn narrow(self) -> Option<SecretRef> {
        SecretRef::from_secret(self)
    }

    fn wrap(event: WatchEvent<SecretRef>) -> ResourceEvent {
        ResourceEvent::Secret(event)
    }
}

type ObjectId = (String, String);

fn identity<K: ResourceExt>(object: &K) -> ObjectId {
    (object.namespace().unwrap_or_default(), object.name_any())
}

/// Turns raw watcher events into added/modified/deleted changes
struct WatchTracker<K: WatchedKind> {
    known: BTreeMap<ObjectId, K::Narrowed>,
    /// Objects seen since the current (re)list started
    relisted: Option<BTreeSet<ObjectId>>,
}

impl<K: WatchedKind> Default for WatchTracker<K> {
    fn default() -> Self {
        Self {
            known: BTreeMap::new(),
            relisted: None,
        }
    }
}

impl<K: WatchedKind> fmt::Debug for WatchTracker<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchTracker")
            .field("known", &self.known.len())
            .field("relisting", &self.relisted.is_some())
            .finish()
    }
}

impl<K: WatchedKind> WatchTracker<K> {
    fn handle(&mut self, event: watcher::Event<K>) -> Vec<WatchEvent<K::Narrowed>> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(BTreeSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(object) => {
                let id = identity(&object);
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(id.clone());
                }
                self.upsert(id, object).into_iter().collect()
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<ObjectId> = self
                    .known
                    .keys()
                    .filter(|id| !seen.contains(*id))
                    .cloned()
                    .collect();
                gone.iter()
                    .filter_map(|id| self.known.remove(id))
                    .map(WatchEvent::Deleted)
                    .collect()
            }
            watcher::Event::Apply(object) => {
                let id = identity(&object);
                self.upsert(id, object).into_iter().collect()
            }
            watcher::Event::Delete(object) => {
                self.known.remove(&identity(&object));
                object.narrow().map(WatchEvent::Deleted).into_iter().collect()
            }
        }
    }

    fn upsert(&mut self, id: ObjectId, object: K) -> Option<WatchEvent<K::Narrowed>> {
        let narrowed = object.narrow()?;
        if self.known.insert(id, narrowed.clone()).is_some() {
            Some(WatchEvent::Modified(narrowed))
        } else {
            Some(WatchEvent::Added(narrowed))
        }
    }
}

/// Start the watch for `K` on its own task
///
/// `ready` fires once the initial list has been delivered. The task ends when
/// the event receiver is dropped.
pub fn spawn_watch<K: WatchedKind>(
    client: Client,
    namespace: Option<&str>,
    backoff: Box<dyn RestartBackoff>,
    events: mpsc::Sender<ResourceEvent>,
    ready: oneshot::Sender<()>,
) -> JoinHandle<()> {
    let api: Api<K> = match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };
    let config = watcher::Config::default().labels(K::label_selector());
    let connect = move || watcher(api.clone(), config.clone());
    tokio::spawn(run_watch(connect, backoff, events, ready))
}

/// Drive watch streams from `connect`, registering a new one after each failure
async fn run_watch<K, F, S, E>(
    mut connect: F,
    mut backoff: Box<dyn RestartBackoff>,
    events: mpsc::Sender<ResourceEvent>,
    ready: oneshot::Sender<()>,
) where
    K: WatchedKind,
    F: FnMut() -> S,
    S: Stream<Item = Result<watcher::Event<K>, E>>,
    E: fmt::Display,
{
    let mut tracker = WatchTracker::<K>::default();
    let mut ready = Some(ready);

    info!(
        resource = K::KIND,
        selector = K::label_selector(),
        "Starting watch"
    );

    loop {
        let stream = connect();
        pin_mut!(stream);

        let reason = loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    let listed = matches!(event, watcher::Event::InitDone);
                    for change in tracker.handle(event) {
                        debug!(resource = K::KIND, event = change.kind(), "Watch event");
                        if events.send(K::wrap(change)).await.is_err() {
                            debug!(resource = K::KIND, "Event receiver closed, stopping watch");
                            return;
                        }
                    }
                    if listed {
                        backoff.reset();
                        if let Some(ready) = ready.take() {
                            info!(resource = K::KIND, "Watch ready");
                            let _ = ready.send(());
                        }
                    }
                }
                Some(Err(e)) => break e.to_string(),
                None => break "watch stream ended".to_string(),
            }
        };

        let delay = backoff.next_delay();
        warn!(
            resource = K::KIND,
            error = %reason,
            delay_secs = delay.as_secs_f64(),
            "Watch failed, re-registering"
        );
        metrics::increment_watch_restarts(K::KIND);
        tokio::time::sleep(delay).await;
    }
}
