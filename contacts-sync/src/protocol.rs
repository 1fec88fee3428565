//! Binary protocol between [`RemoteClient`] and [`CollectionServer`].
//!
//! Every WebSocket binary frame carries one bincode-encoded
//! [`CollectionMessage`]. Requests carry a client-chosen `request_id`; the
//! server answers each with exactly one response bearing the same id.
//!
//! ```text
//! client                                   server
//!   │ Subscribe{id, collection}  ─────────►  │
//!   │ ◄───────────────────────── Ack{id}      │
//!   │ ◄──────── Snapshot{subscription: id, …} │  (initial, then one per change)
//!   │ Create{id, collection, draft} ───────► │
//!   │ ◄───────────────────── Created{id, …}   │  or Failed{id, error}
//!   │ Unsubscribe{subscription} ───────────► │
//! ```
//!
//! [`RemoteClient`]: crate::client::RemoteClient
//! [`CollectionServer`]: crate::server::CollectionServer

use serde::{Deserialize, Serialize};

use contacts_core::{CollectionError, ContactDraft, ContactId, ContactRecord};

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectionMessage {
    // Client → server
    Subscribe {
        request_id: u64,
        collection: String,
    },
    Unsubscribe {
        subscription_id: u64,
    },
    Get {
        request_id: u64,
        collection: String,
        id: ContactId,
    },
    Create {
        request_id: u64,
        collection: String,
        draft: ContactDraft,
    },
    Update {
        request_id: u64,
        collection: String,
        id: ContactId,
        patch: ContactDraft,
    },
    Delete {
        request_id: u64,
        collection: String,
        id: ContactId,
    },

    // Server → client
    /// Request succeeded with no payload
    Ack {
        request_id: u64,
    },
    Created {
        request_id: u64,
        id: ContactId,
    },
    Found {
        request_id: u64,
        record: ContactRecord,
    },
    Failed {
        request_id: u64,
        error: CollectionError,
    },
    /// Full record set for a subscription (id = the Subscribe request id)
    Snapshot {
        subscription_id: u64,
        sequence: u64,
        records: Vec<ContactRecord>,
    },
    /// The subscription failed at the server; nothing else follows for it
    SubscriptionClosed {
        subscription_id: u64,
        error: CollectionError,
    },
}

impl CollectionMessage {
    /// The request id a response answers, if this is a response.
    pub fn response_id(&self) -> Option<u64> {
        match self {
            Self::Ack { request_id }
            | Self::Created { request_id, .. }
            | Self::Found { request_id, .. }
            | Self::Failed { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// The request id of a client request, if this is one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::Subscribe { request_id, .. }
            | Self::Get { request_id, .. }
            | Self::Create { request_id, .. }
            | Self::Update { request_id, .. }
            | Self::Delete { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    Timeout,
    UnexpectedResponse(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Request timeout"),
            Self::UnexpectedResponse(e) => write!(f, "Unexpected response: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for CollectionError {
    fn from(e: ProtocolError) -> Self {
        CollectionError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let records = vec![
            ContactRecord::new(ContactId::new(), "Ann", "Acme", "PM"),
            ContactRecord::new(ContactId::new(), "Bo", "", ""),
        ];
        let msg = CollectionMessage::Snapshot {
            subscription_id: 7,
            sequence: 3,
            records: records.clone(),
        };

        let decoded = CollectionMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_failed_carries_error_kind() {
        let id = ContactId::new();
        let msg = CollectionMessage::Failed {
            request_id: 12,
            error: CollectionError::NotFound(id),
        };

        match CollectionMessage::decode(&msg.encode().unwrap()).unwrap() {
            CollectionMessage::Failed { request_id, error } => {
                assert_eq!(request_id, 12);
                assert_eq!(error, CollectionError::NotFound(id));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_request_and_response_ids() {
        let create = CollectionMessage::Create {
            request_id: 4,
            collection: "contacts".into(),
            draft: ContactDraft::new("Ann", "", ""),
        };
        assert_eq!(create.request_id(), Some(4));
        assert_eq!(create.response_id(), None);

        let ack = CollectionMessage::Ack { request_id: 4 };
        assert_eq!(ack.response_id(), Some(4));
        assert_eq!(ack.request_id(), None);

        let snapshot = CollectionMessage::Snapshot {
            subscription_id: 1,
            sequence: 0,
            records: Vec::new(),
        };
        assert_eq!(snapshot.response_id(), None);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = CollectionMessage::decode(&[0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, ProtocolError::DeserializationError(_)));
    }

    #[test]
    fn test_protocol_error_maps_to_transport() {
        let err: CollectionError = ProtocolError::Timeout.into();
        assert!(err.is_transport());
    }
}
