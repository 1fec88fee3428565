//! Keeps a local [`Mirror`] in step with a remote collection.
//!
//! ```text
//! RemoteCollection ──subscribe──► Subscription ──► mirror task ──► on_change(MirrorUpdate)
//!                                                      │
//!                                                      └──► current mirror (replaced, never patched)
//! ```
//!
//! Notifications are applied strictly in arrival order, one full replacement
//! each. A failed subscription is reported once as `MirrorUpdate::Terminated`
//! and is not retried here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use contacts_core::{CollectionError, Mirror, Result};

use crate::remote::RemoteCollection;

/// Lifecycle of the mirror's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Idle,
    Live,
    Stopped,
    Failed,
}

/// Delivered to the `on_change` callback.
#[derive(Debug, Clone)]
pub enum MirrorUpdate {
    /// The mirror was replaced by a new snapshot
    Snapshot { sequence: u64, mirror: Mirror },
    /// The subscription failed; no further updates follow
    Terminated(CollectionError),
}

pub struct SyncMirror {
    remote: Arc<dyn RemoteCollection>,
    collection: String,

    /// Latest fully-applied mirror
    current: Arc<RwLock<Mirror>>,

    state: Arc<RwLock<MirrorState>>,

    /// Snapshots applied since construction
    applied: Arc<AtomicU64>,

    /// Held while a callback runs; `false` once stopped
    gate: Option<Arc<Mutex<bool>>>,

    task: Option<JoinHandle<()>>,
}

impl SyncMirror {
    pub fn new(remote: Arc<dyn RemoteCollection>, collection: impl Into<String>) -> Self {
        Self {
            remote,
            collection: collection.into(),
            current: Arc::new(RwLock::new(Mirror::empty())),
            state: Arc::new(RwLock::new(MirrorState::Idle)),
            applied: Arc::new(AtomicU64::new(0)),
            gate: None,
            task: None,
        }
    }

    /// Subscribe and start applying notifications.
    ///
    /// Fails if the mirror is already live, or if the subscription cannot be
    /// established. Once this returns `Ok`, every later failure arrives through
    /// `on_change` as `MirrorUpdate::Terminated`.
    pub async fn start<F>(&mut self, mut on_change: F) -> Result<()>
    where
        F: FnMut(MirrorUpdate) + Send + 'static,
    {
        if *self.state.read().await == MirrorState::Live {
            return Err(CollectionError::Validation(format!(
                "sync for '{}' already started",
                self.collection
            )));
        }
        // A previous run may have ended on its own (terminal failure)
        self.gate = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let mut subscription = match self.remote.subscribe(&self.collection).await {
            Ok(sub) => sub,
            Err(e) => {
                *self.state.write().await = MirrorState::Failed;
                log::warn!("Subscription to '{}' failed: {e}", self.collection);
                return Err(e);
            }
        };

        let gate = Arc::new(Mutex::new(true));
        self.gate = Some(gate.clone());
        *self.state.write().await = MirrorState::Live;
        log::info!("Mirror for '{}' is live", self.collection);

        let current = self.current.clone();
        let state = self.state.clone();
        let applied = self.applied.clone();
        let collection = self.collection.clone();

        self.task = Some(tokio::spawn(async move {
            loop {
                let next = subscription.next().await;

                let active = gate.lock().await;
                if !*active {
                    break;
                }

                match next {
                    Some(Ok(notification)) => {
                        let mirror = Mirror::from_records(notification.records.iter().cloned());
                        *current.write().await = mirror.clone();
                        applied.fetch_add(1, Ordering::SeqCst);
                        log::debug!(
                            "Mirror '{collection}' replaced by snapshot #{} ({} records)",
                            notification.sequence,
                            mirror.len()
                        );
                        on_change(MirrorUpdate::Snapshot {
                            sequence: notification.sequence,
                            mirror,
                        });
                    }
                    Some(Err(e)) => {
                        *state.write().await = MirrorState::Failed;
                        log::warn!("Subscription to '{collection}' terminated: {e}");
                        on_change(MirrorUpdate::Terminated(e));
                        break;
                    }
                    None => {
                        *state.write().await = MirrorState::Failed;
                        log::warn!("Subscription to '{collection}' ended");
                        on_change(MirrorUpdate::Terminated(CollectionError::Transport(
                            "subscription ended".to_string(),
                        )));
                        break;
                    }
                }
            }
        }));

        Ok(())
    }

    /// Cancel the subscription. Once this returns, `on_change` is never called
    /// again, including for notifications that had already arrived.
    pub async fn stop(&mut self) {
        if let Some(gate) = self.gate.take() {
            // Waits for an in-flight callback to finish
            *gate.lock().await = false;
        }
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }

        let mut state = self.state.write().await;
        if *state == MirrorState::Live {
            *state = MirrorState::Stopped;
            log::info!("Mirror for '{}' stopped", self.collection);
        }
    }

    /// The latest fully-applied mirror.
    pub async fn current(&self) -> Mirror {
        self.current.read().await.clone()
    }

    pub async fn state(&self) -> MirrorState {
        *self.state.read().await
    }

    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl Drop for SyncMirror {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
