use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use tether_model::{WatchName, WatchStatus};

use crate::store::WatchStore;

/// Pushes worker status snapshots back into the object store, deduplicating
/// writes.
///
/// A snapshot equal to the last one successfully written for that identity
/// is skipped, so unrelated reconciliation passes don't generate redundant
/// store traffic. Failed writes (conflicts, deleted objects) are dropped for
/// the pass rather than queued: the next natural event re-publishes with
/// current data.
pub struct StatusPublisher {
    store: Arc<dyn WatchStore>,
    last_written: Mutex<HashMap<WatchName, WatchStatus>>,
}

impl fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("StatusPublisher");
        match self.last_written.try_lock() {
            Ok(guard) => debug.field("tracked", &guard.len()),
            Err(_) => debug.field("tracked", &"<locked>"),
        };
        debug.finish()
    }
}

impl StatusPublisher {
    pub fn new(store: Arc<dyn WatchStore>) -> Self {
        Self {
            store,
            last_written: Mutex::new(HashMap::new()),
        }
    }

    pub async fn publish(&self, name: &WatchName, status: WatchStatus) {
        {
            let last_written = self.last_written.lock().await;
            if last_written.get(name) == Some(&status) {
                return;
            }
        }

        match self.store.update_status(name, status.clone()).await {
            Ok(()) => {
                self.last_written.lock().await.insert(name.clone(), status);
            }
            Err(err) => {
                debug!(target: "tether::status", watch = %name, error = %err,
                    "dropping status write for this pass");
            }
        }
    }

    /// Drop the cached snapshot for a deleted identity so a future watch
    /// with the same name starts from a clean slate.
    pub async fn forget(&self, name: &WatchName) {
        self.last_written.lock().await.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use tether_model::{FileWatchStatus, WatchSpec};

    use crate::error::{Result, TetherError};
    use crate::store::StoreEvent;

    use super::*;

    #[derive(Debug, Default)]
    struct CountingStore {
        writes: AtomicUsize,
        conflicts_remaining: AtomicUsize,
    }

    #[async_trait]
    impl WatchStore for CountingStore {
        async fn list(&self) -> Result<HashMap<WatchName, WatchSpec>> {
            Ok(HashMap::new())
        }

        async fn get(&self, _name: &WatchName) -> Result<Option<WatchSpec>> {
            Ok(None)
        }

        async fn status(&self, _name: &WatchName) -> Result<Option<WatchStatus>> {
            Ok(None)
        }

        async fn update_status(&self, name: &WatchName, _status: WatchStatus) -> Result<()> {
            if self
                .conflicts_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TetherError::Conflict(name.clone()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
            broadcast::channel(1).1
        }
    }

    fn status_with_error(message: &str) -> WatchStatus {
        WatchStatus::FileWatch(FileWatchStatus {
            error: message.to_owned(),
            ..FileWatchStatus::default()
        })
    }

    #[tokio::test]
    async fn identical_snapshots_are_written_once() {
        let store = Arc::new(CountingStore::default());
        let publisher = StatusPublisher::new(store.clone());
        let name = WatchName::from("frontend");

        publisher.publish(&name, status_with_error("boom")).await;
        publisher.publish(&name, status_with_error("boom")).await;
        publisher.publish(&name, status_with_error("boom")).await;

        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_snapshots_are_written_again() {
        let store = Arc::new(CountingStore::default());
        let publisher = StatusPublisher::new(store.clone());
        let name = WatchName::from("frontend");

        publisher.publish(&name, status_with_error("boom")).await;
        publisher.publish(&name, status_with_error("")).await;

        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn conflicted_writes_are_dropped_not_cached() {
        let store = Arc::new(CountingStore::default());
        store.conflicts_remaining.store(1, Ordering::SeqCst);
        let publisher = StatusPublisher::new(store.clone());
        let name = WatchName::from("frontend");

        // First write conflicts and is dropped.
        publisher.publish(&name, status_with_error("boom")).await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);

        // The same snapshot is not treated as already-written.
        publisher.publish(&name, status_with_error("boom")).await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }
}
