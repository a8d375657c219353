//! The spec-diff reconciler.
//!
//! A single in-process authority owns the mapping from watch name to live
//! worker. Each pass compares the desired spec set against the active set
//! and starts, stops, or replaces workers so the live set exactly mirrors
//! the declared one. Passes are idempotent: unchanged input produces zero
//! starts and stops.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tether_model::{
    FileWatchStatus, PodLogStreamStatus, WatchName, WatchSpec, WatchStatus,
};

use crate::cluster::{ClusterLogClient, LogSink, PortForwardClient};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::forward::{PortForwardParams, spawn_port_forward};
use crate::logstream::{LogStreamParams, spawn_log_stream};
use crate::status::StatusPublisher;
use crate::store::WatchStore;
use crate::watch::{FileWatchParams, NotifierFactory, spawn_file_watch};
use crate::worker::{Watermark, WorkerHandle};

/// The runtime record for one live worker.
#[derive(Debug)]
struct ActiveWatch {
    /// Last-applied spec, kept for change detection.
    spec: WatchSpec,
    handle: WorkerHandle,
}

/// All shared reconciler bookkeeping, behind one lock.
///
/// Critical sections are pure bookkeeping; resource acquisition and
/// teardown always happen outside the lock.
#[derive(Debug, Default)]
struct ReconcilerState {
    watches: Mutex<HashMap<WatchName, ActiveWatch>>,
}

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub started: Vec<WatchName>,
    pub stopped: Vec<WatchName>,
    /// Identities whose worker could not start this pass, with the reason.
    pub failed: Vec<(WatchName, String)>,
}

impl ReconcileSummary {
    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.failed.is_empty()
    }
}

/// Compares desired specs against the active worker set and issues
/// start/stop/replace decisions.
pub struct Reconciler {
    state: ReconcilerState,
    store: Arc<dyn WatchStore>,
    notifiers: Arc<dyn NotifierFactory>,
    log_client: Arc<dyn ClusterLogClient>,
    forwards: Arc<dyn PortForwardClient>,
    sink: Arc<dyn LogSink>,
    publisher: Arc<StatusPublisher>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self
            .state
            .watches
            .try_lock()
            .map(|guard| guard.len())
            .unwrap_or_default();
        f.debug_struct("Reconciler")
            .field("active_watches", &active)
            .field("config", &self.config)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn WatchStore>,
        notifiers: Arc<dyn NotifierFactory>,
        log_client: Arc<dyn ClusterLogClient>,
        forwards: Arc<dyn PortForwardClient>,
        sink: Arc<dyn LogSink>,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let publisher = Arc::new(StatusPublisher::new(Arc::clone(&store)));
        Self {
            state: ReconcilerState::default(),
            store,
            notifiers,
            log_client,
            forwards,
            sink,
            publisher,
            config,
            shutdown,
        }
    }

    pub fn publisher(&self) -> Arc<StatusPublisher> {
        Arc::clone(&self.publisher)
    }

    /// Bring the active worker set in line with `desired`.
    ///
    /// A spec change replaces the worker: the successor starts first (it
    /// inherits the predecessor's handoff slot), then the old worker is
    /// stopped. The brief overlap means duplicate events are possible and
    /// accepted; a gap in coverage is not.
    pub async fn reconcile(&self, desired: HashMap<WatchName, WatchSpec>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let mut removals: Vec<(WatchName, ActiveWatch)> = Vec::new();
        let mut superseded: Vec<(WatchName, ActiveWatch)> = Vec::new();
        let mut starts: Vec<(WatchName, WatchSpec, Option<oneshot::Receiver<Watermark>>)> =
            Vec::new();

        {
            let mut watches = self.state.watches.lock().await;

            let stale: Vec<WatchName> = watches
                .keys()
                .filter(|name| !desired.contains_key(*name))
                .cloned()
                .collect();
            for name in stale {
                if let Some(active) = watches.remove(&name) {
                    removals.push((name, active));
                }
            }

            for (name, spec) in &desired {
                let unchanged = watches
                    .get(name)
                    .is_some_and(|active| active.spec == *spec);
                if unchanged {
                    continue;
                }
                match watches.remove(name) {
                    Some(mut active) => {
                        let handoff = active.handle.take_handoff();
                        starts.push((name.clone(), spec.clone(), handoff));
                        superseded.push((name.clone(), active));
                    }
                    None => starts.push((name.clone(), spec.clone(), None)),
                }
            }
        }

        for (name, active) in removals {
            debug!(target: "tether::reconcile", watch = %name, "stopping removed watch");
            active.handle.cancel();
            self.publisher.forget(&name).await;
            summary.stopped.push(name);
        }

        let mut started: Vec<(WatchName, ActiveWatch)> = Vec::new();
        for (name, spec, resume) in starts {
            match self.start_worker(&name, spec.clone(), resume).await {
                Ok(handle) => {
                    debug!(target: "tether::reconcile", watch = %name, kind = %spec.kind(),
                        "started watch worker");
                    started.push((name.clone(), ActiveWatch { spec, handle }));
                    summary.started.push(name);
                }
                Err(err) => {
                    warn!(target: "tether::reconcile", watch = %name, error = %err,
                        "watch worker failed to start");
                    self.publish_start_failure(&name, &spec, &err.to_string()).await;
                    summary.failed.push((name, err.to_string()));
                }
            }
        }

        // Superseded workers stop only after their successors are live, to
        // avoid a gap in coverage.
        for (name, active) in superseded {
            debug!(target: "tether::reconcile", watch = %name, "stopping superseded watch");
            active.handle.cancel();
            summary.stopped.push(name);
        }

        {
            let mut watches = self.state.watches.lock().await;
            for (name, entry) in started {
                watches.insert(name, entry);
            }
        }

        summary
    }

    /// Stop every worker and wait for the tasks to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<(WatchName, ActiveWatch)> = {
            let mut watches = self.state.watches.lock().await;
            watches.drain().collect()
        };
        for (name, active) in drained {
            debug!(target: "tether::reconcile", watch = %name, "draining watch for shutdown");
            active.handle.stop().await;
        }
    }

    /// Names of the currently active workers, for observability and tests.
    pub async fn active_names(&self) -> Vec<WatchName> {
        let watches = self.state.watches.lock().await;
        let mut names: Vec<WatchName> = watches.keys().cloned().collect();
        names.sort();
        names
    }

    async fn start_worker(
        &self,
        name: &WatchName,
        spec: WatchSpec,
        resume: Option<oneshot::Receiver<Watermark>>,
    ) -> Result<WorkerHandle> {
        match spec {
            WatchSpec::FileWatch(spec) => {
                let initial_status = match self.store.status(name).await {
                    Ok(Some(WatchStatus::FileWatch(status))) => status,
                    _ => FileWatchStatus::default(),
                };
                spawn_file_watch(
                    FileWatchParams {
                        name: name.clone(),
                        spec,
                        notifiers: Arc::clone(&self.notifiers),
                        publisher: Arc::clone(&self.publisher),
                        config: self.config.clone(),
                        initial_status,
                        resume,
                    },
                    &self.shutdown,
                )
            }
            WatchSpec::PodLogStream(spec) => {
                let initial_status = match self.store.status(name).await {
                    Ok(Some(WatchStatus::PodLogStream(status))) => status,
                    _ => PodLogStreamStatus::default(),
                };
                Ok(spawn_log_stream(
                    LogStreamParams {
                        name: name.clone(),
                        spec,
                        client: Arc::clone(&self.log_client),
                        sink: Arc::clone(&self.sink),
                        publisher: Arc::clone(&self.publisher),
                        config: self.config.clone(),
                        initial_status,
                        resume,
                    },
                    &self.shutdown,
                ))
            }
            WatchSpec::PortForward(spec) => Ok(spawn_port_forward(
                PortForwardParams {
                    name: name.clone(),
                    spec,
                    client: Arc::clone(&self.forwards),
                    config: self.config.clone(),
                },
                &self.shutdown,
            )),
        }
    }

    /// Surface a start failure as a status field so one identity's bad spec
    /// never blocks the rest of the pass.
    async fn publish_start_failure(&self, name: &WatchName, spec: &WatchSpec, message: &str) {
        match spec {
            WatchSpec::FileWatch(_) => {
                let mut status = match self.store.status(name).await {
                    Ok(Some(WatchStatus::FileWatch(status))) => status,
                    _ => FileWatchStatus::default(),
                };
                status.record_error(message.to_owned(), chrono::Utc::now());
                self.publisher
                    .publish(name, WatchStatus::FileWatch(status))
                    .await;
            }
            WatchSpec::PodLogStream(_) => {
                let mut status = match self.store.status(name).await {
                    Ok(Some(WatchStatus::PodLogStream(status))) => status,
                    _ => PodLogStreamStatus::default(),
                };
                status.error = message.to_owned();
                self.publisher
                    .publish(name, WatchStatus::PodLogStream(status))
                    .await;
            }
            // Port-forwards publish no status object; the warn log above is
            // the user-visible signal.
            WatchSpec::PortForward(_) => {}
        }
    }
}
