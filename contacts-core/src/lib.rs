//! # contacts-core: data model and view derivation for live contact lists
//!
//! Everything in this crate is synchronous and free of I/O:
//!
//! - [`record`]: `ContactId`, `ContactRecord`, `ContactDraft`
//! - [`mirror`]: immutable local copy of the remote collection
//! - [`query`]: filter / sort / pagination parameters and their reset policy
//! - [`pipeline`]: `derive_view`, mirror + query → visible page
//! - [`summary`]: role distribution and recent companies over the mirror
//! - [`error`]: the `CollectionError` taxonomy shared with `contacts-sync`

pub mod error;
pub mod mirror;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod summary;

pub use error::{CollectionError, Result};
pub use mirror::Mirror;
pub use pipeline::{available_role_filters, derive_view, filter_and_sort, DerivedView, OTHER_ROLE};
pub use query::{QueryState, RoleFilter, SortField, SortOrder, ALL_ROLES, DEFAULT_PAGE_SIZE};
pub use record::{ContactDraft, ContactId, ContactRecord};
pub use summary::{MirrorSummary, RECENT_COMPANY_LIMIT, UNKNOWN_ROLE};
