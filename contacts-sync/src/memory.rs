//! In-process streaming document store.
//!
//! Holds named collections in memory and publishes a full snapshot to every
//! subscriber after each successful write. It backs [`CollectionServer`] and
//! doubles as the store used in tests: [`MemoryCollection::stats`] counts every
//! call it receives, and one-shot failures can be injected.
//!
//! Writes publish while holding the collection's write lock, and subscribers
//! attach under the read lock, so every subscriber sees an unbroken,
//! in-order sequence of snapshots starting from the state at subscribe time.
//!
//! [`CollectionServer`]: crate::server::CollectionServer

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

use contacts_core::{CollectionError, ContactDraft, ContactId, ContactRecord, Result};

use crate::broadcast::{notification_stream, BroadcastStats, SnapshotBroadcast};
use crate::remote::{Notification, RemoteCollection, Subscription};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Notifications buffered per subscriber before it is considered lagged
    pub broadcast_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
        }
    }
}

/// Call counters, one per operation kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub subscribes: u64,
    pub gets: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    /// Snapshots published after writes (initial snapshots excluded)
    pub notifications: u64,
}

impl StoreStats {
    /// Calls that would have crossed the network.
    pub fn total_calls(&self) -> u64 {
        self.subscribes + self.gets + self.creates + self.updates + self.deletes
    }
}

struct AtomicStoreStats {
    subscribes: AtomicU64,
    gets: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    notifications: AtomicU64,
}

impl AtomicStoreStats {
    fn new() -> Self {
        Self {
            subscribes: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// One named collection: records in insertion order plus its fan-out.
struct CollectionState {
    records: IndexMap<ContactId, ContactRecord>,
    broadcast: SnapshotBroadcast,
    sequence: u64,
}

impl CollectionState {
    fn new(capacity: usize) -> Self {
        Self {
            records: IndexMap::new(),
            broadcast: SnapshotBroadcast::new(capacity),
            sequence: 0,
        }
    }

    fn snapshot(&self) -> Notification {
        Notification::new(self.sequence, self.records.values().cloned().collect())
    }

    /// Advance the sequence and fan the new state out.
    fn publish(&mut self) -> usize {
        self.sequence += 1;
        let notification = self.snapshot();
        self.broadcast.publish(notification)
    }
}

pub struct MemoryCollection {
    config: MemoryConfig,
    collections: RwLock<HashMap<String, CollectionState>>,
    stats: AtomicStoreStats,
    /// Returned by the next call instead of performing it
    injected_failure: Mutex<Option<CollectionError>>,
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryCollection {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            collections: RwLock::new(HashMap::new()),
            stats: AtomicStoreStats::new(),
            injected_failure: Mutex::new(None),
        }
    }

    /// Pre-populate a collection without publishing or counting calls.
    pub async fn seed(&self, collection: &str, records: impl IntoIterator<Item = ContactRecord>) {
        let mut collections = self.collections.write().await;
        let state = collections
            .entry(collection.to_string())
            .or_insert_with(|| CollectionState::new(self.config.broadcast_capacity));
        for record in records {
            state.records.insert(record.id, record);
        }
    }

    /// Make the next call fail with `error` without touching any data.
    pub fn inject_failure(&self, error: CollectionError) {
        let mut slot = self
            .injected_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(error);
    }

    fn take_injected_failure(&self) -> Result<()> {
        let mut slot = self
            .injected_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Terminate every live subscription on `collection` with a transport
    /// error. Returns how many subscribers were dropped.
    pub async fn disconnect_subscribers(&self, collection: &str) -> usize {
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection) {
            Some(state) => {
                let dropped = state.broadcast.disconnect_all();
                log::info!("Disconnected {dropped} subscribers from '{collection}'");
                dropped
            }
            None => 0,
        }
    }

    /// Current records of a collection, in insertion order.
    pub async fn records(&self, collection: &str) -> Vec<ContactRecord> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|state| state.records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn subscriber_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |state| state.broadcast.subscriber_count())
    }

    pub async fn broadcast_stats(&self, collection: &str) -> Option<BroadcastStats> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|state| state.broadcast.stats())
    }

    /// Lock-free snapshot of the call counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            subscribes: self.stats.subscribes.load(Ordering::Relaxed),
            gets: self.stats.gets.load(Ordering::Relaxed),
            creates: self.stats.creates.load(Ordering::Relaxed),
            updates: self.stats.updates.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            notifications: self.stats.notifications.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn published(&self, collection: &str, state: &mut CollectionState) {
        let receivers = state.publish();
        AtomicStoreStats::bump(&self.stats.notifications);
        log::debug!(
            "Published '{collection}' #{} ({} records) to {receivers} subscribers",
            state.sequence,
            state.records.len()
        );
    }
}

#[async_trait]
impl RemoteCollection for MemoryCollection {
    async fn subscribe(&self, collection: &str) -> Result<Subscription> {
        AtomicStoreStats::bump(&self.stats.subscribes);
        self.take_injected_failure()?;

        // Fast path: read lock
        {
            let collections = self.collections.read().await;
            if let Some(state) = collections.get(collection) {
                let rx = state.broadcast.subscribe();
                let initial = state.snapshot();
                return Ok(Subscription::new(collection, notification_stream(initial, rx)));
            }
        }

        // Slow path: write lock to create an empty collection
        let mut collections = self.collections.write().await;
        let state = collections
            .entry(collection.to_string())
            .or_insert_with(|| CollectionState::new(self.config.broadcast_capacity));
        let rx = state.broadcast.subscribe();
        let initial = state.snapshot();
        Ok(Subscription::new(collection, notification_stream(initial, rx)))
    }

    async fn get(&self, collection: &str, id: ContactId) -> Result<ContactRecord> {
        AtomicStoreStats::bump(&self.stats.gets);
        self.take_injected_failure()?;

        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|state| state.records.get(&id).cloned())
            .ok_or(CollectionError::NotFound(id))
    }

    async fn create(&self, collection: &str, draft: ContactDraft) -> Result<ContactId> {
        AtomicStoreStats::bump(&self.stats.creates);
        self.take_injected_failure()?;

        let mut collections = self.collections.write().await;
        let state = collections
            .entry(collection.to_string())
            .or_insert_with(|| CollectionState::new(self.config.broadcast_capacity));

        let id = ContactId::new();
        state.records.insert(id, ContactRecord::from_draft(id, draft));
        self.published(collection, state);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: ContactId, patch: ContactDraft) -> Result<()> {
        AtomicStoreStats::bump(&self.stats.updates);
        self.take_injected_failure()?;

        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or(CollectionError::NotFound(id))?;
        let record = state
            .records
            .get_mut(&id)
            .ok_or(CollectionError::NotFound(id))?;
        record.apply(&patch);
        self.published(collection, state);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: ContactId) -> Result<()> {
        AtomicStoreStats::bump(&self.stats.deletes);
        self.take_injected_failure()?;

        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or(CollectionError::NotFound(id))?;
        // shift_remove keeps the remaining records in insertion order
        if state.records.shift_remove(&id).is_none() {
            return Err(CollectionError::NotFound(id));
        }
        self.published(collection, state);
        Ok(())
    }
}
