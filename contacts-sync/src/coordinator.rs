//! Write path: create, update and remove contacts at the remote store.
//!
//! The coordinator never touches a mirror. A successful write becomes visible
//! only when the store's next notification reaches the [`SyncMirror`], so there
//! is a window after the write is acknowledged during which the mirror is
//! still stale. Failures are returned exactly once and never retried.
//!
//! [`SyncMirror`]: crate::mirror::SyncMirror

use std::sync::Arc;

use contacts_core::{ContactDraft, ContactId, ContactRecord, Result};

use crate::remote::RemoteCollection;

pub struct MutationCoordinator {
    remote: Arc<dyn RemoteCollection>,
    collection: String,
}

impl MutationCoordinator {
    pub fn new(remote: Arc<dyn RemoteCollection>, collection: impl Into<String>) -> Self {
        Self {
            remote,
            collection: collection.into(),
        }
    }

    /// Create a contact. An empty or whitespace-only name is rejected with
    /// `Validation` before anything is sent.
    pub async fn create(&self, draft: ContactDraft) -> Result<ContactId> {
        if let Err(e) = draft.validate() {
            log::debug!("Rejected create in '{}': {e}", self.collection);
            return Err(e);
        }

        let id = self.remote.create(&self.collection, draft).await.map_err(|e| {
            log::warn!("Create in '{}' failed: {e}", self.collection);
            e
        })?;
        log::debug!("Created contact {id} in '{}'", self.collection);
        Ok(id)
    }

    /// Overwrite a contact's fields. A concurrent remote delete surfaces as
    /// `NotFound`.
    pub async fn update(&self, id: ContactId, patch: ContactDraft) -> Result<()> {
        self.remote
            .update(&self.collection, id, patch)
            .await
            .map_err(|e| {
                log::warn!("Update of {id} in '{}' failed: {e}", self.collection);
                e
            })?;
        log::debug!("Updated contact {id} in '{}'", self.collection);
        Ok(())
    }

    /// Delete a contact. Deleting an id that is already gone returns
    /// `NotFound`, which callers may treat as a benign outcome.
    pub async fn remove(&self, id: ContactId) -> Result<()> {
        self.remote.delete(&self.collection, id).await.map_err(|e| {
            if e.is_not_found() {
                log::debug!("Contact {id} was already removed from '{}'", self.collection);
            } else {
                log::warn!("Remove of {id} from '{}' failed: {e}", self.collection);
            }
            e
        })?;
        log::debug!("Removed contact {id} from '{}'", self.collection);
        Ok(())
    }

    /// Read one contact straight from the store.
    pub async fn fetch(&self, id: ContactId) -> Result<ContactRecord> {
        self.remote.get(&self.collection, id).await
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}
