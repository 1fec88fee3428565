//! Fan-out of full collection snapshots to every subscriber.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each subscriber gets an independent receiver that buffers up to `capacity`
//! notifications. A subscriber that falls further behind than that cannot be
//! brought back in order, so its stream ends with a `Transport` error.

use futures_util::stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use contacts_core::CollectionError;

use crate::remote::{Notification, NotificationStream};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub notifications_sent: u64,
    /// Notifications published while nobody was subscribed
    pub notifications_unobserved: u64,
    pub active_subscribers: usize,
}

/// Atomic broadcast stats: lock-free on the hot path.
struct AtomicBroadcastStats {
    notifications_sent: AtomicU64,
    notifications_unobserved: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            notifications_sent: AtomicU64::new(0),
            notifications_unobserved: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single collection.
pub struct SnapshotBroadcast {
    sender: broadcast::Sender<Notification>,

    /// Channel capacity (notifications buffered per receiver)
    capacity: usize,

    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl SnapshotBroadcast {
    /// Create a new broadcast group with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Send a snapshot to every current subscriber.
    ///
    /// Returns the number of receivers it was queued for.
    pub fn publish(&self, notification: Notification) -> usize {
        let count = self.sender.send(notification).unwrap_or(0);
        self.atomic_stats
            .notifications_sent
            .fetch_add(1, Ordering::Relaxed);
        if count == 0 {
            self.atomic_stats
                .notifications_unobserved
                .fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    /// Raw receiver for notifications published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Drop every current subscriber. Their streams end with a `Transport`
    /// error; later subscribers are unaffected.
    pub fn disconnect_all(&mut self) -> usize {
        let dropped = self.sender.receiver_count();
        let (sender, _) = broadcast::channel(self.capacity);
        self.sender = sender;
        dropped
    }

    /// Lock-free snapshot of the counters.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            notifications_sent: self.atomic_stats.notifications_sent.load(Ordering::Relaxed),
            notifications_unobserved: self
                .atomic_stats
                .notifications_unobserved
                .load(Ordering::Relaxed),
            active_subscribers: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

enum StreamState {
    Initial(Notification, broadcast::Receiver<Notification>),
    Live(broadcast::Receiver<Notification>),
    Done,
}

/// Turn an initial snapshot plus a broadcast receiver into a notification
/// stream. The receiver must have been created no earlier than the snapshot
/// was taken, otherwise stale notifications would follow it.
pub fn notification_stream(
    initial: Notification,
    rx: broadcast::Receiver<Notification>,
) -> NotificationStream {
    Box::pin(stream::unfold(
        StreamState::Initial(initial, rx),
        |state| async move {
            match state {
                StreamState::Initial(first, rx) => Some((Ok(first), StreamState::Live(rx))),
                StreamState::Live(mut rx) => match rx.recv().await {
                    Ok(notification) => Some((Ok(notification), StreamState::Live(rx))),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Subscriber lagged by {skipped} notifications");
                        Some((
                            Err(CollectionError::Transport(format!(
                                "subscription lagged by {skipped} notifications"
                            ))),
                            StreamState::Done,
                        ))
                    }
                    Err(RecvError::Closed) => Some((
                        Err(CollectionError::Transport(
                            "subscription closed by store".to_string(),
                        )),
                        StreamState::Done,
                    )),
                },
                StreamState::Done => None,
            }
        },
    ))
}
