//! WebSocket client for a [`CollectionServer`].
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Request/response correlation by `request_id`, with a per-request timeout
//! - Subscriptions multiplexed over the one connection
//!
//! A lost connection fails every in-flight request and terminates every
//! subscription with a `Transport` error. Nothing is retried or replayed.
//!
//! Queues are bounded by `ClientConfig::queue_capacity`. A subscription whose
//! consumer falls that far behind is ended with `Transport("lagged")`.
//!
//! [`CollectionServer`]: crate::server::CollectionServer

use async_trait::async_trait;
use futures_util::{stream, SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use contacts_core::{CollectionError, ContactDraft, ContactId, ContactRecord, Result};

use crate::protocol::{CollectionMessage, ProtocolError};
use crate::remote::{Notification, NotificationStream, RemoteCollection, Subscription};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://127.0.0.1:9191`
    pub url: String,
    /// How long a request waits for its response
    pub request_timeout_secs: u64,
    /// Capacity of the outgoing queue and of each subscription's queue
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9191".to_string(),
            request_timeout_secs: 10,
            queue_capacity: 256,
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type SubscriptionSender = mpsc::Sender<Result<Notification>>;

/// Where incoming frames are routed. `open` is false between connections;
/// nothing can be registered then.
#[derive(Default)]
struct Routes {
    open: bool,
    pending: HashMap<u64, oneshot::Sender<CollectionMessage>>,
    subscriptions: HashMap<u64, SubscriptionSender>,
}

struct Shared {
    state: RwLock<ConnectionState>,
    routes: Mutex<Routes>,
    next_request_id: AtomicU64,
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the routing table: pending requests see their sender dropped
    /// and every subscription receives a terminal error.
    async fn fail_all(&self, reason: &str) {
        *self.state.write().await = ConnectionState::Disconnected;

        let (pending, subscriptions) = {
            let mut routes = self.routes();
            routes.open = false;
            (
                std::mem::take(&mut routes.pending),
                std::mem::take(&mut routes.subscriptions),
            )
        };

        if !pending.is_empty() || !subscriptions.is_empty() {
            log::warn!(
                "Connection lost ({reason}): failing {} requests and {} subscriptions",
                pending.len(),
                subscriptions.len()
            );
        }
        drop(pending);
        for (_, tx) in subscriptions {
            let _ = tx.try_send(Err(CollectionError::Transport(format!(
                "connection lost: {reason}"
            ))));
        }
    }

    /// Deliver one decoded frame from the server.
    fn route(&self, msg: CollectionMessage) {
        if let Some(request_id) = msg.response_id() {
            let waiter = self.routes().pending.remove(&request_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(msg);
                }
                None => log::debug!("Dropping response to unknown request #{request_id}"),
            }
            return;
        }

        match msg {
            CollectionMessage::Snapshot { subscription_id, sequence, records } => {
                let mut routes = self.routes();
                let Some(tx) = routes.subscriptions.get(&subscription_id) else {
                    return;
                };
                match tx.try_send(Ok(Notification::new(sequence, records))) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        // Dropping the sender ends the stream with a lag error
                        log::warn!("Subscription #{subscription_id} lagged: consumer queue full");
                        routes.subscriptions.remove(&subscription_id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        routes.subscriptions.remove(&subscription_id);
                    }
                }
            }
            CollectionMessage::SubscriptionClosed { subscription_id, error } => {
                let tx = self.routes().subscriptions.remove(&subscription_id);
                if let Some(tx) = tx {
                    log::warn!("Subscription #{subscription_id} closed by server: {error}");
                    let _ = tx.try_send(Err(error));
                }
            }
            other => log::warn!("Unexpected message from server: {other:?}"),
        }
    }
}

/// Removes a request's routing entry when the waiting call goes away,
/// whether it completed, timed out or was dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.routes().pending.remove(&self.request_id);
    }
}

/// Turn a subscription queue into a notification stream. A queue that closes
/// without a terminal error was dropped for lagging.
fn subscription_stream(rx: mpsc::Receiver<Result<Notification>>) -> NotificationStream {
    let notifications = stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Ok(notification)) => Some((Ok(notification), Some(rx))),
            Some(Err(error)) => Some((Err(error), None)),
            None => Some((Err(CollectionError::Transport("lagged".to_string())), None)),
        }
    });
    Box::pin(notifications)
}

/// The collection client.
///
/// Call [`connect`](Self::connect) before handing it out as a
/// [`RemoteCollection`].
pub struct RemoteClient {
    config: ClientConfig,
    shared: Arc<Shared>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    tasks: Vec<JoinHandle<()>>,
}

impl RemoteClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                routes: Mutex::new(Routes::default()),
                next_request_id: AtomicU64::new(1),
            }),
            outgoing_tx: None,
            tasks: Vec::new(),
        }
    }

    /// Client for `url` with default timeouts.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(ClientConfig {
            url: url.into(),
            ..ClientConfig::default()
        })
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> std::result::Result<(), ProtocolError> {
        if *self.shared.state.read().await == ConnectionState::Connected {
            return Ok(());
        }
        self.abort_tasks();
        *self.shared.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.config.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.config.url);
                *self.shared.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(self.config.queue_capacity.max(1));
        self.outgoing_tx = Some(out_tx);
        self.shared.routes().open = true;

        // Writer task: forward outgoing channel to WebSocket
        let writer = tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: route incoming frames to requests and subscriptions
        let shared = self.shared.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match ws_reader.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        match CollectionMessage::decode(&bytes) {
                            Ok(msg) => shared.route(msg),
                            Err(e) => log::warn!("Failed to decode server message: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                    Some(Err(e)) => break e.to_string(),
                    _ => {}
                }
            };
            shared.fail_all(&reason).await;
        });

        self.tasks = vec![writer, reader];
        *self.shared.state.write().await = ConnectionState::Connected;
        log::info!("Connected to {}", self.config.url);
        Ok(())
    }

    /// Drop the connection. In-flight requests and live subscriptions fail
    /// with `Transport`.
    pub async fn disconnect(&mut self) {
        self.abort_tasks();
        self.outgoing_tx = None;
        self.shared.fail_all("disconnected by client").await;
        log::info!("Disconnected from {}", self.config.url);
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.config.url
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.routes().pending.len()
    }

    /// Number of subscriptions currently routed by this client.
    pub fn active_subscriptions(&self) -> usize {
        self.shared.routes().subscriptions.len()
    }

    fn next_request_id(&self) -> u64 {
        self.shared.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn outgoing(&self) -> std::result::Result<&mpsc::Sender<Vec<u8>>, ProtocolError> {
        self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)
    }

    /// Send a request and wait for the response with the same id.
    ///
    /// `Failed` responses are returned as the error they carry.
    async fn request(&self, msg: CollectionMessage) -> Result<CollectionMessage> {
        let request_id = msg
            .request_id()
            .ok_or_else(|| ProtocolError::UnexpectedResponse(format!("{msg:?} is not a request")))?;
        let encoded = msg.encode()?;
        let tx = self.outgoing()?;

        let (resp_tx, resp_rx) = oneshot::channel();
        {
            let mut routes = self.shared.routes();
            if !routes.open {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            routes.pending.insert(request_id, resp_tx);
        }
        let _guard = PendingGuard {
            shared: &self.shared,
            request_id,
        };
        if tx.send(encoded).await.is_err() {
            return Err(ProtocolError::ConnectionClosed.into());
        }

        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        match tokio::time::timeout(timeout, resp_rx).await {
            Ok(Ok(CollectionMessage::Failed { error, .. })) => Err(error),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed.into()),
            Err(_) => {
                log::warn!("Request #{request_id} timed out after {timeout:?}");
                Err(ProtocolError::Timeout.into())
            }
        }
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

fn unexpected(response: CollectionMessage) -> CollectionError {
    ProtocolError::UnexpectedResponse(format!("{response:?}")).into()
}

#[async_trait]
impl RemoteCollection for RemoteClient {
    async fn subscribe(&self, collection: &str) -> Result<Subscription> {
        let out_tx = self.outgoing()?.clone();
        let request_id = self.next_request_id();

        // Routed before the request goes out: the first snapshot may arrive
        // right behind the acknowledgement
        let (sub_tx, sub_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        {
            let mut routes = self.shared.routes();
            if !routes.open {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            routes.subscriptions.insert(request_id, sub_tx);
        }

        let response = self
            .request(CollectionMessage::Subscribe {
                request_id,
                collection: collection.to_string(),
            })
            .await;
        match response {
            Ok(CollectionMessage::Ack { .. }) => {}
            Ok(other) => {
                self.shared.routes().subscriptions.remove(&request_id);
                return Err(unexpected(other));
            }
            Err(e) => {
                self.shared.routes().subscriptions.remove(&request_id);
                return Err(e);
            }
        }
        log::debug!("Subscribed to '{collection}' as #{request_id}");

        let shared = self.shared.clone();
        Ok(Subscription::new(collection, subscription_stream(sub_rx)).with_unsubscribe_hook(
            move || {
                // The route may already be gone after a lag or a server-side
                // close; the server still holds nothing for an unknown id
                let open = {
                    let mut routes = shared.routes();
                    routes.subscriptions.remove(&request_id);
                    routes.open
                };
                if !open {
                    return;
                }
                let msg = CollectionMessage::Unsubscribe {
                    subscription_id: request_id,
                };
                let Ok(encoded) = msg.encode() else {
                    return;
                };
                if let Err(TrySendError::Full(encoded)) = out_tx.try_send(encoded) {
                    match tokio::runtime::Handle::try_current() {
                        Ok(handle) => {
                            handle.spawn(async move {
                                let _ = out_tx.send(encoded).await;
                            });
                        }
                        Err(_) => log::warn!("Could not send unsubscribe for #{request_id}"),
                    }
                }
            },
        ))
    }

    async fn get(&self, collection: &str, id: ContactId) -> Result<ContactRecord> {
        let msg = CollectionMessage::Get {
            request_id: self.next_request_id(),
            collection: collection.to_string(),
            id,
        };
        match self.request(msg).await? {
            CollectionMessage::Found { record, .. } => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    async fn create(&self, collection: &str, draft: ContactDraft) -> Result<ContactId> {
        let msg = CollectionMessage::Create {
            request_id: self.next_request_id(),
            collection: collection.to_string(),
            draft,
        };
        match self.request(msg).await? {
            CollectionMessage::Created { id, .. } => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    async fn update(&self, collection: &str, id: ContactId, patch: ContactDraft) -> Result<()> {
        let msg = CollectionMessage::Update {
            request_id: self.next_request_id(),
            collection: collection.to_string(),
            id,
            patch,
        };
        match self.request(msg).await? {
            CollectionMessage::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, collection: &str, id: ContactId) -> Result<()> {
        let msg = CollectionMessage::Delete {
            request_id: self.next_request_id(),
            collection: collection.to_string(),
            id,
        };
        match self.request(msg).await? {
            CollectionMessage::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
