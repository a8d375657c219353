//! # Tether Core
//!
//! The live-reconciliation engine behind Tether: given a declarative set of
//! "things to watch" (file paths, pod containers, port pairs) that changes
//! continuously, maintain a set of live, cancellable background workers that
//! exactly mirrors the declared set, without missing events, without
//! duplicate workers, and recovering from transient failures without
//! restarting the whole tool.
//!
//! ## Architecture
//!
//! - [`coalesce`]: debounces bursts of raw change notifications into batches
//! - [`backoff`]: exponential retry delays with jitter and a ceiling
//! - [`watch`], [`logstream`], [`forward`]: the per-kind watch workers
//! - [`reconciler`]: diffs desired specs against the active worker set
//! - [`status`]: writes worker status back to the store, deduplicating
//! - [`store`]: the declarative object store interface and in-memory impl
//! - [`engine`]: ties store change notifications to reconciliation passes
//!
//! External collaborators (the cluster API and the log sink) enter through
//! the capability traits in [`cluster`], and the filesystem event source
//! through [`watch::NotifierFactory`], so everything is testable with
//! deterministic doubles.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tether_core::engine::Engine;
//! use tether_core::config::EngineConfig;
//! use tether_core::store::MemoryStore;
//! use tether_core::watch::FsNotifierFactory;
//! # use tether_core::cluster::{ClusterLogClient, LogSink, PortForwardClient};
//!
//! # async fn run(
//! #     log_client: Arc<dyn ClusterLogClient>,
//! #     forwards: Arc<dyn PortForwardClient>,
//! #     sink: Arc<dyn LogSink>,
//! # ) -> tether_core::error::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let engine = Engine::new(
//!     store.clone(),
//!     Arc::new(FsNotifierFactory),
//!     log_client,
//!     forwards,
//!     sink,
//!     EngineConfig::default(),
//! );
//! engine.start().await?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod backoff;
pub mod cluster;
pub mod coalesce;
pub mod config;
pub mod engine;
pub mod error;
pub mod forward;
pub mod logstream;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod watch;
pub mod worker;

pub use backoff::Backoff;
pub use cluster::{ClusterLogClient, ContainerInfo, ContainerState, LogSink, LogStream,
    PortForwardClient};
pub use coalesce::{Coalesced, coalesce};
pub use config::{CoalesceConfig, EngineConfig, LogStreamConfig, RetryConfig};
pub use engine::Engine;
pub use error::{Result, TetherError};
pub use reconciler::{ReconcileSummary, Reconciler};
pub use status::StatusPublisher;
pub use store::{MemoryStore, StoreEvent, WatchStore};
pub use watch::{FsNotifierFactory, IgnoreMatcher, Notifier, NotifierFactory};
pub use worker::{Watermark, WorkerHandle, WorkerState};
