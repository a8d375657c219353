//! Shared lifecycle plumbing for watch workers.
//!
//! Every kind of watch (filesystem, log stream, port forward) runs as one
//! concurrent task owning a child cancellation token. Replacement handoff is
//! a single-slot rendezvous: the outgoing worker writes its watermark
//! exactly once while draining, and the incoming worker reads it exactly
//! once (or the slot is discarded when nothing replaces the worker).

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tether_model::{WatchKind, WatchName};

/// How far a worker progressed before stopping, carried to its successor.
pub type Watermark = DateTime<Utc>;

/// Observable lifecycle states of a watch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Restarting,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Restarting => "restarting",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Tracks and logs one worker's state transitions.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    watch: WatchName,
    kind: WatchKind,
    state: WorkerState,
}

impl Lifecycle {
    pub(crate) fn new(watch: WatchName, kind: WatchKind) -> Self {
        Self {
            watch,
            kind,
            state: WorkerState::Starting,
        }
    }

    pub(crate) fn transition(&mut self, next: WorkerState) {
        if self.state == next {
            return;
        }
        debug!(target: "tether::worker", watch = %self.watch, kind = %self.kind,
            from = %self.state, to = %next, "worker state change");
        self.state = next;
    }
}

/// Handle to one live worker task held by the reconciler.
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    handoff: Option<oneshot::Receiver<Watermark>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        cancel: CancellationToken,
        task: JoinHandle<()>,
        handoff: oneshot::Receiver<Watermark>,
    ) -> Self {
        Self {
            cancel,
            task,
            handoff: Some(handoff),
        }
    }

    /// Signal the worker to drain. Returns immediately; the task finishes on
    /// its own.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Take the handoff slot for a successor. Yields `None` if it was
    /// already claimed.
    pub fn take_handoff(&mut self) -> Option<oneshot::Receiver<Watermark>> {
        self.handoff.take()
    }

    /// Cancel and wait for the worker task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Await a predecessor's watermark, tolerating a predecessor that died
/// without draining cleanly.
pub(crate) async fn recv_watermark(
    resume: Option<oneshot::Receiver<Watermark>>,
) -> Option<Watermark> {
    match resume {
        Some(rx) => rx.await.ok(),
        None => None,
    }
}
