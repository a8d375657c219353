use std::path::PathBuf;

use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Upper bound on the file-event history retained in a status object.
pub const MAX_FILE_EVENT_HISTORY: usize = 20;

/// Declarative configuration for one filesystem watch.
///
/// `paths` are relative to `root_path`; the engine resolves them to absolute
/// paths at worker start and rejects entries that are already absolute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileWatchSpec {
    pub root_path: PathBuf,
    pub paths: Vec<String>,
    /// Glob patterns matched against paths relative to `root_path`.
    pub ignore_patterns: Vec<String>,
}

/// One coalesced batch of filesystem changes, as recorded in status history.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileEvent {
    pub time: DateTime<Utc>,
    pub seen_files: Vec<PathBuf>,
}

/// Status written back for a filesystem watch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileWatchStatus {
    pub last_event_time: Option<DateTime<Utc>>,
    /// Empty means healthy.
    pub error: String,
    /// Recent events, most recent first, capped at [`MAX_FILE_EVENT_HISTORY`].
    pub file_events: Vec<FileEvent>,
}

impl FileWatchStatus {
    /// Record a new batch of seen files.
    ///
    /// The new event is prepended; any of its paths still present in older
    /// entries are evicted from those entries (most-recent-wins), entries
    /// left empty are dropped, and the history is truncated to
    /// [`MAX_FILE_EVENT_HISTORY`]. A successful event also clears the error
    /// field.
    pub fn record_event(&mut self, event: FileEvent) {
        self.last_event_time = Some(event.time);
        self.error.clear();

        for older in self.file_events.iter_mut() {
            older
                .seen_files
                .retain(|path| !event.seen_files.contains(path));
        }
        self.file_events.retain(|entry| !entry.seen_files.is_empty());

        self.file_events.insert(0, event);
        self.file_events.truncate(MAX_FILE_EVENT_HISTORY);
    }

    /// Record a watch error without discarding history.
    pub fn record_error(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.last_event_time = Some(at);
        self.error = message.into();
    }
}
