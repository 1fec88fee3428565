//! WebSocket server exposing a [`RemoteCollection`] to [`RemoteClient`]s.
//!
//! Architecture:
//! ```text
//! Client A ──┐                          ┌── forwarder (sub 1) ──┐
//!            ├── connection task ───────┤                        ├── outgoing queue ── Client A
//! Client B ──┘        │                 └── forwarder (sub 2) ──┘
//!                     ▼
//!              RemoteCollection (MemoryCollection)
//! ```
//!
//! Each connection owns one bounded outgoing queue for subscription
//! snapshots. Request responses are written by the connection task itself,
//! and a `Subscribe` acknowledgement is written before its forwarder starts,
//! so it always reaches the client ahead of the first snapshot.
//!
//! A forwarder that finds the queue full ends its subscription with a
//! `Transport("lagged")` error instead of buffering further snapshots.
//!
//! [`RemoteClient`]: crate::client::RemoteClient

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use contacts_core::CollectionError;

use crate::memory::{MemoryCollection, MemoryConfig};
use crate::protocol::CollectionMessage;
use crate::remote::{RemoteCollection, Subscription};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Notification buffer per subscriber in the hosted store
    pub broadcast_capacity: usize,
    /// Connections beyond this are dropped before the handshake
    pub max_connections: usize,
    /// Snapshots queued per connection before a subscription counts as lagging
    pub outgoing_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            broadcast_capacity: 256,
            max_connections: 1024,
            outgoing_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_subscriptions: u64,
}

/// The collection server.
pub struct CollectionServer {
    config: ServerConfig,
    store: Arc<dyn RemoteCollection>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollectionServer {
    /// Serve `store` with the given configuration.
    pub fn new(config: ServerConfig, store: Arc<dyn RemoteCollection>) -> Self {
        Self {
            config,
            store,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Host a fresh in-memory store sized from `config`.
    pub fn in_memory(config: ServerConfig) -> Self {
        let store = MemoryCollection::new(MemoryConfig {
            broadcast_capacity: config.broadcast_capacity,
        });
        Self::new(config, Arc::new(store))
    }

    pub fn with_defaults() -> Self {
        Self::in_memory(ServerConfig::default())
    }

    /// Bind the configured address. Use port 0 to let the OS pick one and
    /// read it back from the listener.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Collection server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until the task is cancelled.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            {
                let mut s = self.stats.write().await;
                if s.active_connections as usize >= self.config.max_connections {
                    s.rejected_connections += 1;
                    log::warn!(
                        "Rejecting {addr}: {} connections already active",
                        s.active_connections
                    );
                    continue;
                }
                s.total_connections += 1;
                s.active_connections += 1;
            }

            let store = self.store.clone();
            let stats = self.stats.clone();
            let capacity = self.config.outgoing_capacity.max(1);

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, store, stats.clone(), capacity).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
                let mut s = stats.write().await;
                s.active_connections = s.active_connections.saturating_sub(1);
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        store: Arc<dyn RemoteCollection>,
        stats: Arc<RwLock<ServerStats>>,
        capacity: usize,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        let (out_tx, mut out_rx) = mpsc::channel::<CollectionMessage>(capacity);
        // Forwarders that ended on their own report their id here
        let (done_tx, mut done_rx) = mpsc::channel::<u64>(capacity);
        let mut forwarders: HashMap<u64, JoinHandle<()>> = HashMap::new();

        let result: Result<(), BoxError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let bytes: Vec<u8> = data.into();
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += bytes.len() as u64;
                                }

                                let request = match CollectionMessage::decode(&bytes) {
                                    Ok(request) => request,
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        continue;
                                    }
                                };

                                match request {
                                    CollectionMessage::Subscribe { request_id, collection } => {
                                        match store.subscribe(&collection).await {
                                            Ok(subscription) => {
                                                let ack = CollectionMessage::Ack { request_id }.encode()?;
                                                ws_sender.send(Message::Binary(ack.into())).await?;
                                                let task = spawn_forwarder(
                                                    request_id,
                                                    subscription,
                                                    out_tx.clone(),
                                                    done_tx.clone(),
                                                );
                                                if let Some(previous) = forwarders.insert(request_id, task) {
                                                    previous.abort();
                                                } else {
                                                    stats.write().await.active_subscriptions += 1;
                                                }
                                                log::debug!("{addr} subscribed to '{collection}' as #{request_id}");
                                            }
                                            Err(error) => {
                                                let failed = CollectionMessage::Failed { request_id, error }.encode()?;
                                                ws_sender.send(Message::Binary(failed.into())).await?;
                                            }
                                        }
                                    }
                                    CollectionMessage::Unsubscribe { subscription_id } => {
                                        if let Some(task) = forwarders.remove(&subscription_id) {
                                            task.abort();
                                            let mut s = stats.write().await;
                                            s.active_subscriptions = s.active_subscriptions.saturating_sub(1);
                                            log::debug!("{addr} unsubscribed #{subscription_id}");
                                        }
                                    }
                                    other => match handle_request(store.as_ref(), other).await {
                                        Some(response) => {
                                            let encoded = response.encode()?;
                                            ws_sender.send(Message::Binary(encoded.into())).await?;
                                        }
                                        None => log::warn!("Unexpected message from {addr}"),
                                    },
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    outgoing = out_rx.recv() => {
                        match outgoing {
                            Some(msg) => {
                                let encoded = msg.encode()?;
                                ws_sender.send(Message::Binary(encoded.into())).await?;
                            }
                            None => break,
                        }
                    }

                    Some(subscription_id) = done_rx.recv() => {
                        if forwarders.remove(&subscription_id).is_some() {
                            let mut s = stats.write().await;
                            s.active_subscriptions = s.active_subscriptions.saturating_sub(1);
                            log::debug!("{addr} subscription #{subscription_id} ended");
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        // Cleanup: release every subscription this connection held
        let released = forwarders.len() as u64;
        for (_, task) in forwarders.drain() {
            task.abort();
        }
        if released > 0 {
            let mut s = stats.write().await;
            s.active_subscriptions = s.active_subscriptions.saturating_sub(released);
        }

        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The hosted store.
    pub fn store(&self) -> &Arc<dyn RemoteCollection> {
        &self.store
    }
}

/// Run a point request against the store and build its response.
async fn handle_request(
    store: &dyn RemoteCollection,
    request: CollectionMessage,
) -> Option<CollectionMessage> {
    let response = match request {
        CollectionMessage::Get { request_id, collection, id } => {
            match store.get(&collection, id).await {
                Ok(record) => CollectionMessage::Found { request_id, record },
                Err(error) => CollectionMessage::Failed { request_id, error },
            }
        }
        CollectionMessage::Create { request_id, collection, draft } => {
            match store.create(&collection, draft).await {
                Ok(id) => CollectionMessage::Created { request_id, id },
                Err(error) => CollectionMessage::Failed { request_id, error },
            }
        }
        CollectionMessage::Update { request_id, collection, id, patch } => {
            match store.update(&collection, id, patch).await {
                Ok(()) => CollectionMessage::Ack { request_id },
                Err(error) => CollectionMessage::Failed { request_id, error },
            }
        }
        CollectionMessage::Delete { request_id, collection, id } => {
            match store.delete(&collection, id).await {
                Ok(()) => CollectionMessage::Ack { request_id },
                Err(error) => CollectionMessage::Failed { request_id, error },
            }
        }
        _ => return None,
    };
    Some(response)
}

/// Pump one subscription into the connection's outgoing queue.
///
/// Ends the subscription with `Transport("lagged")` when the queue is full,
/// and reports its id on `done_tx` whenever it ends by itself.
fn spawn_forwarder(
    subscription_id: u64,
    mut subscription: Subscription,
    out_tx: mpsc::Sender<CollectionMessage>,
    done_tx: mpsc::Sender<u64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let error = loop {
            let msg = match subscription.next().await {
                Some(Ok(notification)) => CollectionMessage::Snapshot {
                    subscription_id,
                    sequence: notification.sequence,
                    records: notification.records.to_vec(),
                },
                Some(Err(error)) => break Some(error),
                None => break Some(CollectionError::Transport("subscription ended".to_string())),
            };
            match out_tx.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!("Subscription #{subscription_id} lagged: outgoing queue full");
                    break Some(CollectionError::Transport("lagged".to_string()));
                }
                Err(TrySendError::Closed(_)) => break None,
            }
        };
        drop(subscription);

        if let Some(error) = error {
            let _ = out_tx
                .send(CollectionMessage::SubscriptionClosed { subscription_id, error })
                .await;
        }
        let _ = done_tx.send(subscription_id).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use contacts_core::{ContactDraft, ContactId};

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9191");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.max_connections, 1024);
        assert_eq!(config.outgoing_capacity, 256);
    }

    #[test]
    fn test_server_creation() {
        let server = CollectionServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9191");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = CollectionServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.rejected_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = CollectionServer::in_memory(ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        });
        let listener = server.bind().await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_handle_request_maps_results() {
        let store = MemoryCollection::default();

        let created = handle_request(
            &store,
            CollectionMessage::Create {
                request_id: 1,
                collection: "contacts".into(),
                draft: ContactDraft::new("Ann", "Acme", "PM"),
            },
        )
        .await
        .unwrap();
        let id = match created {
            CollectionMessage::Created { request_id: 1, id } => id,
            other => panic!("Expected Created, got {other:?}"),
        };

        let found = handle_request(
            &store,
            CollectionMessage::Get { request_id: 2, collection: "contacts".into(), id },
        )
        .await
        .unwrap();
        assert!(matches!(found, CollectionMessage::Found { request_id: 2, ref record } if record.name == "Ann"));

        let ghost = ContactId::new();
        let failed = handle_request(
            &store,
            CollectionMessage::Delete { request_id: 3, collection: "contacts".into(), id: ghost },
        )
        .await
        .unwrap();
        assert_eq!(
            failed,
            CollectionMessage::Failed { request_id: 3, error: CollectionError::NotFound(ghost) }
        );
    }

    #[tokio::test]
    async fn test_handle_request_ignores_responses() {
        let store = MemoryCollection::default();
        assert!(handle_request(&store, CollectionMessage::Ack { request_id: 1 }).await.is_none());
    }

    #[tokio::test]
    async fn test_forwarder_reports_termination() {
        let store = MemoryCollection::default();
        let subscription = store.subscribe("contacts").await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let (done_tx, mut done_rx) = mpsc::channel(1);
        let _task = spawn_forwarder(9, subscription, tx, done_tx);

        match rx.recv().await.unwrap() {
            CollectionMessage::Snapshot { subscription_id, sequence, records } => {
                assert_eq!(subscription_id, 9);
                assert_eq!(sequence, 0);
                assert!(records.is_empty());
            }
            other => panic!("Expected Snapshot, got {other:?}"),
        }

        store.disconnect_subscribers("contacts").await;
        match rx.recv().await.unwrap() {
            CollectionMessage::SubscriptionClosed { subscription_id, error } => {
                assert_eq!(subscription_id, 9);
                assert!(error.is_transport());
            }
            other => panic!("Expected SubscriptionClosed, got {other:?}"),
        }
        assert_eq!(done_rx.recv().await, Some(9));
    }

    #[tokio::test]
    async fn test_forwarder_ends_lagging_subscription() {
        let store = MemoryCollection::default();
        let subscription = store.subscribe("contacts").await.unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let (done_tx, mut done_rx) = mpsc::channel(1);
        let _task = spawn_forwarder(4, subscription, tx, done_tx);

        // Nobody drains the queue: the initial snapshot fills it
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.create("contacts", ContactDraft::new("Ann", "", "")).await.unwrap();
        store.create("contacts", ContactDraft::new("Bo", "", "")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            CollectionMessage::Snapshot { subscription_id: 4, sequence: 0, .. }
        ));
        match rx.recv().await.unwrap() {
            CollectionMessage::SubscriptionClosed { subscription_id, error } => {
                assert_eq!(subscription_id, 4);
                assert_eq!(error, CollectionError::Transport("lagged".to_string()));
            }
            other => panic!("Expected SubscriptionClosed, got {other:?}"),
        }
        assert_eq!(done_rx.recv().await, Some(4));

        // The store side was released with the forwarder
        assert_eq!(store.subscriber_count("contacts").await, 0);
    }
}
