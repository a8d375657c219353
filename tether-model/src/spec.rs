use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::filewatch::{FileWatchSpec, FileWatchStatus};
use crate::forward::PortForwardSpec;
use crate::logstream::{PodLogStreamSpec, PodLogStreamStatus};

/// The kind of background work a watch maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WatchKind {
    FileWatch,
    PodLogStream,
    PortForward,
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchKind::FileWatch => f.write_str("filewatch"),
            WatchKind::PodLogStream => f.write_str("podlogstream"),
            WatchKind::PortForward => f.write_str("portforward"),
        }
    }
}

/// One desired watch, as stored declaratively.
///
/// Compared by deep equality during reconciliation: an unequal spec for an
/// existing name always replaces the running worker, never mutates it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum WatchSpec {
    FileWatch(FileWatchSpec),
    PodLogStream(PodLogStreamSpec),
    PortForward(PortForwardSpec),
}

impl WatchSpec {
    pub fn kind(&self) -> WatchKind {
        match self {
            WatchSpec::FileWatch(_) => WatchKind::FileWatch,
            WatchSpec::PodLogStream(_) => WatchKind::PodLogStream,
            WatchSpec::PortForward(_) => WatchKind::PortForward,
        }
    }
}

/// Status written back for one watch.
///
/// Port-forwards publish no status object; their failures surface through
/// logs only.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum WatchStatus {
    FileWatch(FileWatchStatus),
    PodLogStream(PodLogStreamStatus),
}

impl WatchStatus {
    pub fn as_file_watch(&self) -> Option<&FileWatchStatus> {
        match self {
            WatchStatus::FileWatch(status) => Some(status),
            _ => None,
        }
    }

    pub fn as_pod_log_stream(&self) -> Option<&PodLogStreamStatus> {
        match self {
            WatchStatus::PodLogStream(status) => Some(status),
            _ => None,
        }
    }
}
