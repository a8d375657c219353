//! The filesystem notifier interface and its `notify`-backed implementation.

use std::fmt;
use std::path::PathBuf;

use notify::{Config as NotifyConfig, ErrorKind, EventKind, RecommendedWatcher, RecursiveMode,
    Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{Result, TetherError};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// A raw filesystem change notification. No filtering or deduplication
/// happens at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
}

/// An error surfaced by a running notifier.
#[derive(Debug, Clone)]
pub struct NotifyError {
    pub message: String,
    /// True for platform queue-overflow conditions (e.g. inotify overflow),
    /// which the worker replaces with a fixed actionable message.
    pub overflow: bool,
}

/// The live channels of a started notifier.
#[derive(Debug)]
pub struct NotifierChannels {
    pub events: mpsc::Receiver<FsEvent>,
    pub errors: mpsc::Receiver<NotifyError>,
}

/// One filesystem watch over a fixed set of paths.
///
/// `start` is called exactly once; dropping a notifier must also release its
/// OS resources.
pub trait Notifier: Send {
    fn start(&mut self) -> Result<NotifierChannels>;

    fn close(&mut self) -> Result<()>;

    /// The absolute paths this notifier covers.
    fn paths(&self) -> &[PathBuf];
}

/// Creates notifiers for a resolved set of watch paths.
pub trait NotifierFactory: Send + Sync {
    fn make(&self, paths: Vec<PathBuf>) -> Result<Box<dyn Notifier>>;
}

/// [`NotifierFactory`] backed by the platform watcher from `notify`.
#[derive(Debug, Default)]
pub struct FsNotifierFactory;

impl NotifierFactory for FsNotifierFactory {
    fn make(&self, paths: Vec<PathBuf>) -> Result<Box<dyn Notifier>> {
        Ok(Box::new(FsNotifier {
            paths,
            watcher: None,
        }))
    }
}

/// Recursive watch over a set of roots via `notify::RecommendedWatcher`.
pub struct FsNotifier {
    paths: Vec<PathBuf>,
    watcher: Option<RecommendedWatcher>,
}

impl fmt::Debug for FsNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsNotifier")
            .field("paths", &self.paths)
            .field("started", &self.watcher.is_some())
            .finish()
    }
}

impl Notifier for FsNotifier {
    fn start(&mut self) -> Result<NotifierChannels> {
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if event.need_rescan() {
                        let _ = error_tx.blocking_send(NotifyError {
                            message: "event queue overflowed".to_owned(),
                            overflow: true,
                        });
                        return;
                    }
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    for path in event.paths {
                        if event_tx.blocking_send(FsEvent { path }).is_err() {
                            // receiver gone: the worker is draining
                            return;
                        }
                    }
                }
                Err(err) => {
                    let overflow = matches!(err.kind, ErrorKind::MaxFilesWatch);
                    if error_tx
                        .blocking_send(NotifyError {
                            message: err.to_string(),
                            overflow,
                        })
                        .is_err()
                    {
                        warn!(target: "tether::watch", error = %err,
                            "notifier error after worker drain");
                    }
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| TetherError::Internal(format!("failed to create watcher: {err}")))?;

        for path in &self.paths {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|err| {
                    TetherError::Internal(format!("failed to watch {}: {err}", path.display()))
                })?;
        }

        self.watcher = Some(watcher);
        Ok(NotifierChannels { events, errors })
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the watcher stops the notify stream.
        self.watcher = None;
        Ok(())
    }

    fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}
