//! Core data model definitions shared across Tether crates.
//!
//! Everything here is a plain value type: declarative watch specs, the
//! status objects written back by the engine, and the stable names that key
//! both. Specs are compared by deep equality to detect no-op
//! reconciliations, so every spec type derives [`PartialEq`] over its full
//! contents.
#![allow(missing_docs)]

pub mod filewatch;
pub mod forward;
pub mod logstream;
pub mod name;
pub mod spec;

pub use filewatch::{FileEvent, FileWatchSpec, FileWatchStatus, MAX_FILE_EVENT_HISTORY};
pub use forward::{Forward, PortForwardSpec};
pub use logstream::{ContainerLogStreamStatus, PodLogStreamSpec, PodLogStreamStatus};
pub use name::WatchName;
pub use spec::{WatchKind, WatchSpec, WatchStatus};
