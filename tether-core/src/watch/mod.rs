//! Filesystem watch workers.
//!
//! Each worker owns one notifier over the spec's resolved paths, pipes its
//! raw events through the coalescer, filters ignored paths, and records the
//! surviving batches in the watch's status history.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tether_model::{FileEvent, FileWatchSpec, FileWatchStatus, WatchKind, WatchName, WatchStatus};

use crate::coalesce::coalesce;
use crate::config::EngineConfig;
use crate::error::{Result, TetherError};
use crate::status::StatusPublisher;
use crate::worker::{Lifecycle, Watermark, WorkerHandle, WorkerState, recv_watermark};

pub mod ignore;
pub mod notifier;

pub use ignore::IgnoreMatcher;
pub use notifier::{FsEvent, FsNotifier, FsNotifierFactory, Notifier, NotifierChannels,
    NotifierFactory, NotifyError};

/// Fixed diagnostic substituted for platform queue-overflow errors, which
/// are otherwise too cryptic to act on.
pub const OVERFLOW_ERROR_MESSAGE: &str = "file-watch event queue overflowed and some changes may \
    have been missed; raise the OS file-watch limits (on Linux, \
    fs.inotify.max_queued_events and fs.inotify.max_user_watches) and touch a file to recover";

/// Resolve the spec's relative paths against its root.
///
/// Entries that are already absolute are configuration errors.
pub fn resolve_paths(root: &Path, paths: &[String]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        if Path::new(path).is_absolute() {
            return Err(TetherError::InvalidSpec(format!(
                "watch path is not relative: {path:?}"
            )));
        }
        out.push(root.join(path));
    }
    Ok(out)
}

pub(crate) struct FileWatchParams {
    pub name: WatchName,
    pub spec: FileWatchSpec,
    pub notifiers: Arc<dyn NotifierFactory>,
    pub publisher: Arc<StatusPublisher>,
    pub config: EngineConfig,
    /// Continuation of the predecessor's (or stored) status, so replacement
    /// never resets history.
    pub initial_status: FileWatchStatus,
    pub resume: Option<oneshot::Receiver<Watermark>>,
}

/// Acquire the watch resources and spawn the worker task.
///
/// Path resolution, ignore-rule compilation, and notifier startup happen
/// here so configuration errors surface to the reconciliation pass instead
/// of a dead worker.
pub(crate) fn spawn_file_watch(
    params: FileWatchParams,
    parent: &CancellationToken,
) -> Result<WorkerHandle> {
    let FileWatchParams {
        name,
        spec,
        notifiers,
        publisher,
        config,
        initial_status,
        resume,
    } = params;

    let watch_paths = resolve_paths(&spec.root_path, &spec.paths)?;
    let matcher = IgnoreMatcher::new(spec.root_path.clone(), &spec.ignore_patterns)?;

    let mut notifier = notifiers.make(watch_paths)?;
    let channels = notifier.start()?;

    let cancel = parent.child_token();
    let (handoff_tx, handoff_rx) = oneshot::channel();

    let task = tokio::spawn(run_file_watch(
        name,
        notifier,
        channels,
        matcher,
        publisher,
        config,
        initial_status,
        resume,
        cancel.clone(),
        handoff_tx,
    ));

    Ok(WorkerHandle::new(cancel, task, handoff_rx))
}

#[allow(clippy::too_many_arguments)]
async fn run_file_watch(
    name: WatchName,
    mut notifier: Box<dyn Notifier>,
    channels: NotifierChannels,
    matcher: IgnoreMatcher,
    publisher: Arc<StatusPublisher>,
    config: EngineConfig,
    mut status: FileWatchStatus,
    resume: Option<oneshot::Receiver<Watermark>>,
    cancel: CancellationToken,
    handoff_tx: oneshot::Sender<Watermark>,
) {
    let mut lifecycle = Lifecycle::new(name.clone(), WatchKind::FileWatch);

    // The notifier is already live, so overlap with a predecessor loses no
    // events; its last-event time just seeds continuity.
    if let Some(mark) = recv_watermark(resume).await
        && status.last_event_time.is_none_or(|t| t < mark)
    {
        status.last_event_time = Some(mark);
    }

    let coalesced = coalesce(channels.events, config.coalesce);
    let mut batches = coalesced.batches;
    let mut errors = channels.errors;

    lifecycle.transition(WorkerState::Running);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            batch = batches.recv() => match batch {
                Some(events) => {
                    let seen = filter_batch(&matcher, events);
                    if seen.is_empty() {
                        continue;
                    }
                    status.record_event(FileEvent {
                        time: Utc::now(),
                        seen_files: seen,
                    });
                    publisher
                        .publish(&name, WatchStatus::FileWatch(status.clone()))
                        .await;
                }
                None => break,
            },
            err = errors.recv() => match err {
                Some(err) => {
                    let message = if err.overflow {
                        OVERFLOW_ERROR_MESSAGE.to_owned()
                    } else {
                        err.message
                    };
                    status.record_error(message, Utc::now());
                    publisher
                        .publish(&name, WatchStatus::FileWatch(status.clone()))
                        .await;
                }
                None => break,
            },
        }
    }

    lifecycle.transition(WorkerState::Draining);

    if let Err(err) = notifier.close() {
        debug!(target: "tether::watch", watch = %name, error = %err,
            "error closing notifier");
    }
    publisher
        .publish(&name, WatchStatus::FileWatch(status.clone()))
        .await;
    let _ = handoff_tx.send(status.last_event_time.unwrap_or_else(Utc::now));

    lifecycle.transition(WorkerState::Stopped);
}

/// Drop ignored paths and deduplicate within the batch, preserving order.
fn filter_batch(matcher: &IgnoreMatcher, events: Vec<FsEvent>) -> Vec<PathBuf> {
    let mut seen = Vec::new();
    for event in events {
        if matcher.is_ignored(&event.path) {
            continue;
        }
        if !seen.contains(&event.path) {
            seen.push(event.path);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_against_the_root() {
        let paths = resolve_paths(Path::new("/repo"), &["a/b".into(), "a/c".into()]).unwrap();
        assert_eq!(paths, vec![PathBuf::from("/repo/a/b"), PathBuf::from("/repo/a/c")]);
    }

    #[test]
    fn absolute_paths_are_rejected() {
        let err = resolve_paths(Path::new("/repo"), &["/etc".into()]).unwrap_err();
        assert!(matches!(err, TetherError::InvalidSpec(_)));
    }

    #[test]
    fn batches_are_filtered_and_deduplicated() {
        let matcher = IgnoreMatcher::new("/repo", &["vendor".to_owned()]).unwrap();
        let events = vec![
            FsEvent { path: "/repo/src/a.rs".into() },
            FsEvent { path: "/repo/vendor/dep.rs".into() },
            FsEvent { path: "/repo/src/a.rs".into() },
            FsEvent { path: "/repo/src/b.rs".into() },
        ];
        assert_eq!(
            filter_batch(&matcher, events),
            vec![PathBuf::from("/repo/src/a.rs"), PathBuf::from("/repo/src/b.rs")]
        );
    }
}
