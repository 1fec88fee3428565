//! The remote document store as seen by the sync layer.
//!
//! [`RemoteCollection`] is the single injected handle through which all
//! reads, writes and subscriptions flow. Implementations:
//!
//! - [`MemoryCollection`](crate::memory::MemoryCollection): in-process store, also the test double
//! - [`RemoteClient`](crate::client::RemoteClient): WebSocket link to a [`CollectionServer`](crate::server::CollectionServer)

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use contacts_core::{ContactDraft, ContactId, ContactRecord, Result};

/// One push event: the complete current record set of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Position of this snapshot in the collection's change history
    pub sequence: u64,
    pub records: Arc<Vec<ContactRecord>>,
}

impl Notification {
    pub fn new(sequence: u64, records: Vec<ContactRecord>) -> Self {
        Self {
            sequence,
            records: Arc::new(records),
        }
    }
}

/// Stream of notifications. An `Err` item is terminal: nothing follows it.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Result<Notification>> + Send>>;

/// A live subscription to one collection.
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// releases it at the store.
pub struct Subscription {
    collection: String,
    stream: NotificationStream,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(collection: impl Into<String>, stream: NotificationStream) -> Self {
        Self {
            collection: collection.into(),
            stream,
            on_unsubscribe: None,
        }
    }

    /// Attach a hook that runs exactly once when the subscription is released.
    pub fn with_unsubscribe_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_unsubscribe = Some(Box::new(hook));
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Wait for the next notification. `None` means the stream ended.
    pub async fn next(&mut self) -> Option<Result<Notification>> {
        self.stream.next().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_unsubscribe.take() {
            hook();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

/// Streaming document store holding named collections of contacts.
///
/// Error contract:
/// - `get`, `update` and `delete` fail with `NotFound` when the id is absent
/// - any failure to reach the store is `Transport`
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Subscribe to a collection. The first notification carries the current
    /// record set; every later change produces another full snapshot.
    async fn subscribe(&self, collection: &str) -> Result<Subscription>;

    async fn get(&self, collection: &str, id: ContactId) -> Result<ContactRecord>;

    /// Store a new record and return its assigned id.
    async fn create(&self, collection: &str, draft: ContactDraft) -> Result<ContactId>;

    async fn update(&self, collection: &str, id: ContactId, patch: ContactDraft) -> Result<()>;

    async fn delete(&self, collection: &str, id: ContactId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_subscription_yields_stream_items() {
        let items: Vec<Result<Notification>> =
            vec![Ok(Notification::new(1, Vec::new())), Ok(Notification::new(2, Vec::new()))];
        let mut sub = Subscription::new("contacts", Box::pin(stream::iter(items)));

        assert_eq!(sub.collection(), "contacts");
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 1);
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 2);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_hook_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new("contacts", Box::pin(stream::empty::<Result<Notification>>()))
            .with_unsubscribe_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
