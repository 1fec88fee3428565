use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::ContactId;

/// Failure taxonomy shared by every collection operation.
///
/// `Validation` is produced locally and never reaches the remote store.
/// `NotFound` and `Transport` originate at the remote store (or the link to it)
/// and are handed back to the caller unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Contact not found: {0}")]
    NotFound(ContactId),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl CollectionError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, CollectionError>;
