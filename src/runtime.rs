//! # Runtime
//!
//! The engine loop that ties watches, resync and reconcile passes together.
//!
//! ## Lifecycle
//!
//! 1. Wait for both watches to deliver their initial list
//! 2. Wait the startup delay
//! 3. Run the first reconcile pass
//! 4. From then on, every watch event and every resync tick triggers a pass
//!
//! Events are folded into the cache as they arrive, except while a pass is
//! running: those are held back and applied once the pass completes, so a
//! pass never observes the cache changing underneath it. Triggers during a
//! pass collapse into a single follow-up pass.
//!
//! On shutdown an in-flight pass is allowed to finish, but no follow-up
//! pass starts even if triggers arrived meanwhile.

use crate::cluster::{ClusterApi, KubeCluster};
use crate::config::ControllerConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::model::ResourceEvent;
use crate::parser::{DotenvParser, EnvParser};
use crate::reconciler::Reconciler;
use crate::scheduler::SyncState;
use crate::server::{ListedWatch, ServerState};
use crate::watch;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Client;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Single consumer of watch events and owner of the reconciler
#[derive(Debug)]
pub struct Engine {
    reconciler: Reconciler,
    state: SyncState,
    resync_interval: Duration,
    startup_delay: Duration,
}

impl Engine {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        parser: Arc<dyn EnvParser>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(cluster, parser),
            state: SyncState::new(),
            resync_interval: config.resync_interval(),
            startup_delay: config.startup_delay(),
        }
    }

    /// Run until `shutdown` resolves or the event channel closes
    ///
    /// `ready` resolves once the watches are established. Returns the number
    /// of reconcile passes run.
    pub async fn run<R, S>(
        mut self,
        mut events: mpsc::Receiver<ResourceEvent>,
        ready: R,
        shutdown: S,
    ) -> usize
    where
        R: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut passes = 0;

        if !self.apply_until(&mut events, ready, shutdown.as_mut()).await {
            return passes;
        }
        debug!(
            delay_secs = self.startup_delay.as_secs_f64(),
            "Watches ready, waiting for startup delay"
        );
        let startup = tokio::time::sleep(self.startup_delay);
        if !self.apply_until(&mut events, startup, shutdown.as_mut()).await {
            return passes;
        }

        info!(
            resync_secs = self.resync_interval.as_secs_f64(),
            "Starting reconcile loop"
        );
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.resync_interval, self.resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first pass runs unconditionally
        let mut triggered = true;
        loop {
            if triggered && self.state.trigger() {
                let (ran, outcome) = self
                    .run_passes(&mut events, &mut ticker, shutdown.as_mut())
                    .await;
                passes += ran;
                match outcome {
                    PassOutcome::Idle => {}
                    PassOutcome::ChannelClosed => {
                        info!("Event channel closed, stopping");
                        return passes;
                    }
                    PassOutcome::Shutdown => {
                        info!("Shutdown requested during a pass, stopping");
                        return passes;
                    }
                }
            }

            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping");
                    return passes;
                }
                event = events.recv() => match event {
                    Some(event) => triggered = self.reconciler.apply_event(event),
                    None => {
                        info!("Event channel closed, stopping");
                        return passes;
                    }
                },
                _ = ticker.tick() => {
                    debug!("Resync tick");
                    triggered = true;
                }
            }
        }
    }

    /// Apply incoming events until `until` resolves
    ///
    /// Returns `false` when shutdown was requested or the channel closed first.
    async fn apply_until<U, S>(
        &mut self,
        events: &mut mpsc::Receiver<ResourceEvent>,
        until: U,
        mut shutdown: Pin<&mut S>,
    ) -> bool
    where
        U: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        tokio::pin!(until);
        loop {
            // Queued events are drained before `until` is checked
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested before the first pass");
                    return false;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.reconciler.apply_event(event);
                    }
                    None => {
                        warn!("Event channel closed before the first pass");
                        return false;
                    }
                },
                () = &mut until => return true,
            }
        }
    }

    /// Run a pass, then follow-up passes while triggers keep arriving
    ///
    /// Shutdown lets the in-flight pass finish but skips any follow-up.
    async fn run_passes<S>(
        &mut self,
        events: &mut mpsc::Receiver<ResourceEvent>,
        ticker: &mut Interval,
        mut shutdown: Pin<&mut S>,
    ) -> (usize, PassOutcome)
    where
        S: Future<Output = ()>,
    {
        let mut ran = 0;
        let mut open = true;
        let mut stopping = false;
        let mut deferred = Vec::new();

        loop {
            {
                let Self {
                    reconciler, state, ..
                } = self;
                let pass = reconciler.reconcile_pass();
                tokio::pin!(pass);

                loop {
                    tokio::select! {
                        _ = &mut pass => break,
                        () = &mut shutdown, if !stopping => {
                            debug!("Shutdown requested, finishing the current pass");
                            stopping = true;
                        }
                        event = events.recv(), if open => match event {
                            Some(event) => {
                                deferred.push(event);
                                state.trigger();
                            }
                            None => open = false,
                        },
                        _ = ticker.tick() => {
                            state.trigger();
                        }
                    }
                }
            }
            ran += 1;

            if !deferred.is_empty() {
                debug!(count = deferred.len(), "Applying events deferred during pass");
            }
            for event in deferred.drain(..) {
                self.reconciler.apply_event(event);
            }

            let again = self.state.finish();
            if stopping {
                return (ran, PassOutcome::Shutdown);
            }
            if !again {
                let outcome = if open {
                    PassOutcome::Idle
                } else {
                    PassOutcome::ChannelClosed
                };
                return (ran, outcome);
            }
            debug!("Triggers arrived during the pass, running again");
        }
    }
}

/// Why `run_passes` handed control back to the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Idle,
    ChannelClosed,
    Shutdown,
}

/// Wire the watches and the engine against a live cluster
///
/// Marks the controller ready once both watches have listed, and returns when
/// a shutdown signal arrives.
pub async fn run_controller(
    client: Client,
    config: ControllerConfig,
    server_state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (configmaps_ready_tx, configmaps_ready) = oneshot::channel();
    let (secrets_ready_tx, secrets_ready) = oneshot::channel();

    let namespace = config.watch_namespace.as_deref();
    match namespace {
        Some(namespace) => info!(namespace, "Watching a single namespace"),
        None => info!("Watching all namespaces"),
    }

    let configmap_watch = watch::spawn_watch::<ConfigMap>(
        client.clone(),
        namespace,
        config.watch_backoff(),
        tx.clone(),
        configmaps_ready_tx,
    );
    let secret_watch = watch::spawn_watch::<Secret>(
        client.clone(),
        namespace,
        config.watch_backoff(),
        tx,
        secrets_ready_tx,
    );

    let engine = Engine::new(
        Arc::new(KubeCluster::new(client)),
        Arc::new(DotenvParser),
        &config,
    );

    let ready = async move {
        // A dropped sender means the watch task exited; the engine notices
        // through the closed channel
        let state = &server_state;
        tokio::join!(
            async move {
                if configmaps_ready.await.is_ok() {
                    state.mark_listed(ListedWatch::ConfigMaps);
                }
            },
            async move {
                if secrets_ready.await.is_ok() {
                    state.mark_listed(ListedWatch::Secrets);
                }
            },
        );
        info!("Watches established, controller ready");
    };

    let passes = engine.run(rx, ready, shutdown_signal()).await;

    configmap_watch.abort();
    secret_watch.abort();
    info!(passes, "Controller stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
