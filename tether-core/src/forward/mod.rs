//! Port-forward workers.
//!
//! One worker per forward set; each `Forward` tuple runs its own child loop
//! that recreates the tunnel forever until cancelled. A tunnel that dies
//! quickly advances the backoff before the next attempt; one that ran for a
//! while resets it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tether_model::{Forward, PortForwardSpec, WatchKind, WatchName};

use crate::backoff::Backoff;
use crate::cluster::PortForwardClient;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::worker::{Lifecycle, WorkerHandle, WorkerState};

pub(crate) struct PortForwardParams {
    pub name: WatchName,
    pub spec: PortForwardSpec,
    pub client: Arc<dyn PortForwardClient>,
    pub config: EngineConfig,
}

pub(crate) fn spawn_port_forward(
    params: PortForwardParams,
    parent: &CancellationToken,
) -> WorkerHandle {
    let cancel = parent.child_token();
    let (handoff_tx, handoff_rx) = oneshot::channel();
    let task = tokio::spawn(run_port_forward(params, cancel.clone(), handoff_tx));
    WorkerHandle::new(cancel, task, handoff_rx)
}

async fn run_port_forward(
    params: PortForwardParams,
    cancel: CancellationToken,
    handoff_tx: oneshot::Sender<chrono::DateTime<Utc>>,
) {
    let PortForwardParams {
        name,
        spec,
        client,
        config,
    } = params;

    let mut lifecycle = Lifecycle::new(name.clone(), WatchKind::PortForward);
    lifecycle.transition(WorkerState::Running);

    let mut loops = Vec::with_capacity(spec.forwards.len());
    for forward in &spec.forwards {
        loops.push(tokio::spawn(forward_loop(
            name.clone(),
            spec.pod.clone(),
            spec.namespace.clone(),
            forward.clone(),
            Arc::clone(&client),
            config.clone(),
            cancel.child_token(),
        )));
    }

    if loops.is_empty() {
        cancel.cancelled().await;
    } else {
        for handle in loops {
            let _ = handle.await;
        }
    }

    lifecycle.transition(WorkerState::Draining);
    // Forwards have no resume position; successors discard this mark.
    let _ = handoff_tx.send(Utc::now());
    lifecycle.transition(WorkerState::Stopped);
}

async fn forward_loop(
    name: WatchName,
    pod: String,
    namespace: String,
    forward: Forward,
    client: Arc<dyn PortForwardClient>,
    config: EngineConfig,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(config.retry);

    loop {
        let attempt_started = tokio::time::Instant::now();

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = one_forward(&client, &pod, &namespace, &forward) => result,
        };
        if cancel.is_cancelled() {
            return;
        }

        if let Err(err) = result {
            info!(target: "tether::forward", watch = %name,
                local_port = forward.local_port,
                container_port = forward.container_port,
                error = %err,
                "reconnecting port-forward");
        }

        // A forward that failed within a second gets backed off; one that
        // held for longer resets the schedule.
        if backoff.survived(attempt_started.elapsed()) {
            backoff.reset();
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff.next()) => {}
            }
        }
    }
}

async fn one_forward(
    client: &Arc<dyn PortForwardClient>,
    pod: &str,
    namespace: &str,
    forward: &Forward,
) -> Result<()> {
    let mut tunnel = client.create_forwarder(pod, namespace, forward).await?;
    // Blocks until the tunnel ends.
    tunnel.forward_ports().await
}
