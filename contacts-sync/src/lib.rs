//! # contacts-sync: live contact list over a streaming document store
//!
//! Keeps a local mirror of a remote contact collection current, routes
//! writes back to the store, and exposes the filtered, sorted, paged view
//! computed by `contacts-core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   watch<SessionView>
//! │ ContactsSession │ ─────────────────────► presentation
//! └───┬─────────┬───┘
//!     │         │
//!     ▼         ▼
//! ┌─────────┐ ┌────────────────────┐
//! │SyncMirror│ │MutationCoordinator │
//! └────┬────┘ └─────────┬──────────┘
//!      │ subscribe      │ create / update / delete
//!      ▼                ▼
//! ┌──────────────────────────────┐     WebSocket     ┌──────────────────┐
//! │ dyn RemoteCollection         │ ◄───────────────► │ CollectionServer │
//! │ (MemoryCollection or         │    Binary Proto   │ (MemoryCollection│
//! │  RemoteClient)               │                   │  + fan-out)      │
//! └──────────────────────────────┘                   └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`remote`]: the store handle (`RemoteCollection`) and `Subscription`
//! - [`broadcast`]: per-collection snapshot fan-out
//! - [`memory`]: in-process store, also the test double
//! - [`mirror`]: `SyncMirror`, subscription → local mirror
//! - [`coordinator`]: validated writes
//! - [`session`]: mirror + query + view publication
//! - [`protocol`]: binary wire protocol (bincode-encoded `CollectionMessage`)
//! - [`server`]: WebSocket collection server
//! - [`client`]: WebSocket client implementing `RemoteCollection`

pub mod remote;
pub mod broadcast;
pub mod memory;
pub mod mirror;
pub mod coordinator;
pub mod session;
pub mod protocol;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use remote::{Notification, NotificationStream, RemoteCollection, Subscription};
pub use broadcast::{BroadcastStats, SnapshotBroadcast};
pub use memory::{MemoryCollection, MemoryConfig, StoreStats};
pub use mirror::{MirrorState, MirrorUpdate, SyncMirror};
pub use coordinator::MutationCoordinator;
pub use session::{ContactsSession, SessionConfig, SessionView};
pub use protocol::{CollectionMessage, ProtocolError};
pub use server::{CollectionServer, ServerConfig, ServerStats};
pub use client::{ClientConfig, ConnectionState, RemoteClient};
