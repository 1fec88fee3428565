use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CollectionError, Result};

/// Opaque identifier assigned by the remote store when a contact is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(Uuid);

impl ContactId {
    /// Mint a fresh identifier. Only stores should call this.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single contact as delivered by the remote store.
///
/// Missing string fields deserialize as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: ContactId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub role: String,
}

impl ContactRecord {
    pub fn new(
        id: ContactId,
        name: impl Into<String>,
        company: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            company: company.into(),
            role: role.into(),
        }
    }

    /// Materialize a draft under a store-assigned identifier.
    pub fn from_draft(id: ContactId, draft: ContactDraft) -> Self {
        Self {
            id,
            name: draft.name,
            company: draft.company,
            role: draft.role,
        }
    }

    /// Overwrite every editable field with the patch.
    pub fn apply(&mut self, patch: &ContactDraft) {
        self.name.clone_from(&patch.name);
        self.company.clone_from(&patch.company);
        self.role.clone_from(&patch.role);
    }

    /// The editable fields as a draft.
    pub fn to_draft(&self) -> ContactDraft {
        ContactDraft {
            name: self.name.clone(),
            company: self.company.clone(),
            role: self.role.clone(),
        }
    }
}

/// The editable part of a contact: used both for creation and for full-field
/// updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub role: String,
}

impl ContactDraft {
    pub fn new(
        name: impl Into<String>,
        company: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            company: company.into(),
            role: role.into(),
        }
    }

    /// Name is the only required field; company and role may be empty.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CollectionError::Validation("name is required".to_string()));
        }
        Ok(())
    }
}
