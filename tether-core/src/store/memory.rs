use std::collections::HashMap;
use std::collections::hash_map::Entry as Slot;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use tether_model::{WatchName, WatchSpec, WatchStatus};

use crate::error::{Result, TetherError};
use crate::store::{StoreEvent, WatchStore};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    spec: WatchSpec,
    status: Option<WatchStatus>,
}

/// In-memory [`WatchStore`] used by tests and single-process setups.
///
/// Mutations broadcast [`StoreEvent`]s so an engine subscribed to this store
/// reconciles immediately. Status writes can be forced to fail with
/// conflicts to exercise the publisher's drop-on-conflict path.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<WatchName, Entry>>,
    events: broadcast::Sender<StoreEvent>,
    conflict_next_status_write: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
            conflict_next_status_write: AtomicBool::new(false),
        }
    }

    /// Create or replace a spec, notifying subscribers.
    pub async fn apply(&self, name: WatchName, spec: WatchSpec) {
        {
            let mut entries = self.entries.write().await;
            match entries.entry(name.clone()) {
                Slot::Occupied(mut occupied) => occupied.get_mut().spec = spec,
                Slot::Vacant(vacant) => {
                    vacant.insert(Entry { spec, status: None });
                }
            }
        }
        let _ = self.events.send(StoreEvent::Changed(name));
    }

    /// Delete a spec (and its status), notifying subscribers.
    pub async fn remove(&self, name: &WatchName) {
        let removed = self.entries.write().await.remove(name).is_some();
        if removed {
            let _ = self.events.send(StoreEvent::Removed(name.clone()));
        }
    }

    /// Make the next `update_status` call fail with a conflict.
    pub fn conflict_next_status_write(&self) {
        self.conflict_next_status_write.store(true, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WatchStore for MemoryStore {
    async fn list(&self) -> Result<HashMap<WatchName, WatchSpec>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.spec.clone()))
            .collect())
    }

    async fn get(&self, name: &WatchName) -> Result<Option<WatchSpec>> {
        let entries = self.entries.read().await;
        Ok(entries.get(name).map(|entry| entry.spec.clone()))
    }

    async fn status(&self, name: &WatchName) -> Result<Option<WatchStatus>> {
        let entries = self.entries.read().await;
        Ok(entries.get(name).and_then(|entry| entry.status.clone()))
    }

    async fn update_status(&self, name: &WatchName, status: WatchStatus) -> Result<()> {
        if self.conflict_next_status_write.swap(false, Ordering::SeqCst) {
            return Err(TetherError::Conflict(name.clone()));
        }

        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| TetherError::NotFound(name.clone()))?;
        entry.status = Some(status);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use tether_model::FileWatchSpec;

    use super::*;

    fn file_spec(root: &str) -> WatchSpec {
        WatchSpec::FileWatch(FileWatchSpec {
            root_path: root.into(),
            paths: vec!["src".into()],
            ignore_patterns: vec![],
        })
    }

    #[tokio::test]
    async fn apply_and_remove_notify_subscribers() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        let name = WatchName::from("frontend");
        store.apply(name.clone(), file_spec("/repo")).await;
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Changed(name.clone())
        );

        store.remove(&name).await;
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Removed(name));
    }

    #[tokio::test]
    async fn removing_an_absent_name_is_silent() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();
        store.remove(&WatchName::from("ghost")).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn injected_conflict_fails_one_write() {
        let store = MemoryStore::new();
        let name = WatchName::from("frontend");
        store.apply(name.clone(), file_spec("/repo")).await;

        store.conflict_next_status_write();
        let status = WatchStatus::FileWatch(Default::default());
        let err = store.update_status(&name, status.clone()).await.unwrap_err();
        assert!(err.is_conflict());

        store.update_status(&name, status).await.unwrap();
        assert!(store.status(&name).await.unwrap().is_some());
    }
}
