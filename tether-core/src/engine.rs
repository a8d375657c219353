//! The top-level runtime tying store notifications to reconciliation.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterLogClient, LogSink, PortForwardClient};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::reconciler::{ReconcileSummary, Reconciler};
use crate::store::WatchStore;
use crate::watch::NotifierFactory;

/// Owns the reconciler and the control loop that drives it from store
/// change notifications.
///
/// Reconciliation runs synchronously on the control loop; workers never
/// run on it. Bursts of notifications are drained into a single pass.
pub struct Engine {
    store: Arc<dyn WatchStore>,
    reconciler: Arc<Reconciler>,
    shutdown: CancellationToken,
    control_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .control_task
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false);
        f.debug_struct("Engine")
            .field("reconciler", &self.reconciler)
            .field("control_loop_running", &running)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Engine {
    pub fn new(
        store: Arc<dyn WatchStore>,
        notifiers: Arc<dyn NotifierFactory>,
        log_client: Arc<dyn ClusterLogClient>,
        forwards: Arc<dyn PortForwardClient>,
        sink: Arc<dyn LogSink>,
        config: EngineConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            notifiers,
            log_client,
            forwards,
            sink,
            config,
            shutdown.clone(),
        ));
        Self {
            store,
            reconciler,
            shutdown,
            control_task: Mutex::new(None),
        }
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::clone(&self.reconciler)
    }

    /// Run one reconciliation pass against the store's current spec set.
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary> {
        let desired = self.store.list().await?;
        Ok(self.reconciler.reconcile(desired).await)
    }

    /// Reconcile the current store contents and spawn the control loop.
    pub async fn start(&self) -> Result<()> {
        let events = self.store.subscribe();
        self.reconcile_all().await?;

        let store = Arc::clone(&self.store);
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = self.shutdown.clone();

        let task = tokio::spawn(control_loop(store, reconciler, events, shutdown));

        let mut guard = self.control_task.lock().await;
        if let Some(stale) = guard.replace(task) {
            stale.abort();
        }
        Ok(())
    }

    /// Stop the control loop and drain every worker.
    pub async fn shutdown(&self) {
        info!(target: "tether::engine", "engine shutting down");
        self.shutdown.cancel();
        if let Some(task) = self.control_task.lock().await.take() {
            let _ = task.await;
        }
        self.reconciler.shutdown().await;
    }
}

async fn control_loop(
    store: Arc<dyn WatchStore>,
    reconciler: Arc<Reconciler>,
    mut events: broadcast::Receiver<crate::store::StoreEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    debug!(target: "tether::engine", watch = %event.name(),
                        "store change, reconciling");
                    // Drain any burst of pending notifications into this
                    // single pass.
                    while events.try_recv().is_ok() {}
                    run_pass(&store, &reconciler).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "tether::engine", skipped,
                        "store notifications lagged, re-listing");
                    run_pass(&store, &reconciler).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

async fn run_pass(store: &Arc<dyn WatchStore>, reconciler: &Arc<Reconciler>) {
    match store.list().await {
        Ok(desired) => {
            let summary = reconciler.reconcile(desired).await;
            if !summary.is_noop() {
                debug!(target: "tether::engine",
                    started = summary.started.len(),
                    stopped = summary.stopped.len(),
                    failed = summary.failed.len(),
                    "reconcile pass complete");
            }
        }
        Err(err) => {
            warn!(target: "tether::engine", error = %err, "failed to list specs");
        }
    }
}
