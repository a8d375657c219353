//! The declarative object store consumed by the reconciler.
//!
//! Specs live in the store; the engine subscribes to change notifications
//! and mirrors the stored set with live workers. Statuses flow the other
//! way, written back by the status publisher.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use tether_model::{WatchName, WatchSpec, WatchStatus};

use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// A change notification from the store. Every mutation triggers a
/// reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Changed(WatchName),
    Removed(WatchName),
}

impl StoreEvent {
    pub fn name(&self) -> &WatchName {
        match self {
            StoreEvent::Changed(name) | StoreEvent::Removed(name) => name,
        }
    }
}

/// Persistent home of watch specs and statuses.
///
/// Implementations must treat `update_status` as conditional: a write that
/// races a concurrent modification fails with
/// [`TetherError::Conflict`](crate::error::TetherError::Conflict) rather
/// than clobbering newer data.
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Snapshot of every desired watch.
    async fn list(&self) -> Result<HashMap<WatchName, WatchSpec>>;

    async fn get(&self, name: &WatchName) -> Result<Option<WatchSpec>>;

    async fn status(&self, name: &WatchName) -> Result<Option<WatchStatus>>;

    async fn update_status(&self, name: &WatchName, status: WatchStatus) -> Result<()>;

    /// Subscribe to change notifications. Receivers that fall behind see
    /// `Lagged` and should re-list rather than replay.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
