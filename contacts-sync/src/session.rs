//! Presentation-facing surface: one live, queryable contact list.
//!
//! A `ContactsSession` owns the [`SyncMirror`], the [`QueryState`] and the
//! [`MutationCoordinator`] for one collection. Whenever either the mirror or
//! the query changes, the view is recomputed with [`derive_view`] and
//! published on a `watch` channel, so presentation code reacts to explicit
//! values instead of relying on any re-render scheduling.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use contacts_core::{
    derive_view, CollectionError, ContactDraft, ContactId, ContactRecord, DerivedView, Mirror,
    MirrorSummary, QueryState, Result, RoleFilter, SortField, SortOrder, DEFAULT_PAGE_SIZE,
};

use crate::coordinator::MutationCoordinator;
use crate::mirror::{MirrorState, MirrorUpdate, SyncMirror};
use crate::remote::RemoteCollection;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Collection name at the remote store
    pub collection: String,
    /// Rows per page; must be positive
    pub page_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            collection: "contacts".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One published recomputation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    /// Increments on every recomputation
    pub generation: u64,
    pub view: DerivedView,
    pub summary: MirrorSummary,
    /// Set once the subscription has failed for good
    pub sync_error: Option<CollectionError>,
}

struct SessionState {
    mirror: Mirror,
    query: QueryState,
    generation: u64,
    sync_error: Option<CollectionError>,
}

impl SessionState {
    fn recompute(&mut self) -> SessionView {
        self.generation += 1;
        SessionView {
            generation: self.generation,
            view: derive_view(&self.mirror, &self.query),
            summary: MirrorSummary::from_mirror(&self.mirror),
            sync_error: self.sync_error.clone(),
        }
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ContactsSession {
    sync: SyncMirror,
    coordinator: MutationCoordinator,
    state: Arc<Mutex<SessionState>>,
    views: Arc<watch::Sender<SessionView>>,
}

impl ContactsSession {
    pub fn new(remote: Arc<dyn RemoteCollection>, config: SessionConfig) -> Result<Self> {
        let query = QueryState::with_page_size(config.page_size)?;
        let mut state = SessionState {
            mirror: Mirror::empty(),
            query,
            generation: 0,
            sync_error: None,
        };
        let (views, _) = watch::channel(state.recompute());

        Ok(Self {
            sync: SyncMirror::new(remote.clone(), config.collection.clone()),
            coordinator: MutationCoordinator::new(remote, config.collection),
            state: Arc::new(Mutex::new(state)),
            views: Arc::new(views),
        })
    }

    /// Start following the collection. Each snapshot replaces the mirror,
    /// resets the page to 0 and publishes a new view.
    pub async fn start_sync(&mut self) -> Result<()> {
        lock(&self.state).sync_error = None;
        let state = self.state.clone();
        let views = self.views.clone();

        self.sync
            .start(move |update| {
                let mut s = lock(&state);
                match update {
                    MirrorUpdate::Snapshot { mirror, .. } => {
                        s.mirror = mirror;
                        s.query.on_snapshot();
                    }
                    MirrorUpdate::Terminated(e) => {
                        s.sync_error = Some(e);
                    }
                }
                views.send_replace(s.recompute());
            })
            .await
    }

    /// Stop following the collection. No view is published for
    /// notifications arriving after this returns.
    pub async fn stop_sync(&mut self) {
        self.sync.stop().await;
    }

    pub async fn sync_state(&self) -> MirrorState {
        self.sync.state().await
    }

    /// Recompute the view from the current mirror and query.
    pub fn derive_view(&self) -> DerivedView {
        let s = lock(&self.state);
        derive_view(&s.mirror, &s.query)
    }

    /// The most recently published view.
    pub fn view(&self) -> SessionView {
        self.views.borrow().clone()
    }

    /// Receiver that is notified on every recomputation.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.views.subscribe()
    }

    pub fn mirror(&self) -> Mirror {
        lock(&self.state).mirror.clone()
    }

    pub fn query(&self) -> QueryState {
        lock(&self.state).query.clone()
    }

    pub fn sync_error(&self) -> Option<CollectionError> {
        lock(&self.state).sync_error.clone()
    }

    /// Edit the query and publish the resulting view.
    pub fn update_query<R>(&self, edit: impl FnOnce(&mut QueryState) -> R) -> R {
        let mut s = lock(&self.state);
        let result = edit(&mut s.query);
        self.views.send_replace(s.recompute());
        result
    }

    pub fn set_search_term(&self, term: impl Into<String>) {
        self.update_query(|q| q.set_search_term(term));
    }

    pub fn set_role_filter(&self, filter: impl Into<RoleFilter>) {
        self.update_query(|q| q.set_role_filter(filter));
    }

    pub fn set_sort_field(&self, field: SortField) {
        self.update_query(|q| q.set_sort_field(field));
    }

    pub fn set_sort_order(&self, order: SortOrder) {
        self.update_query(|q| q.set_sort_order(order));
    }

    pub fn toggle_sort_order(&self) {
        self.update_query(QueryState::toggle_sort_order);
    }

    pub fn set_page_index(&self, page_index: usize) {
        self.update_query(|q| q.set_page_index(page_index));
    }

    /// Move to the next page if there is one.
    pub fn next_page(&self) -> bool {
        let mut s = lock(&self.state);
        let current = derive_view(&s.mirror, &s.query);
        let moved = s.query.next_page(&current);
        if moved {
            self.views.send_replace(s.recompute());
        }
        moved
    }

    /// Move to the previous page if there is one.
    pub fn prev_page(&self) -> bool {
        let mut s = lock(&self.state);
        let current = derive_view(&s.mirror, &s.query);
        let moved = s.query.prev_page(&current);
        if moved {
            self.views.send_replace(s.recompute());
        }
        moved
    }

    pub async fn create(&self, draft: ContactDraft) -> Result<ContactId> {
        self.coordinator.create(draft).await
    }

    pub async fn update(&self, id: ContactId, patch: ContactDraft) -> Result<()> {
        self.coordinator.update(id, patch).await
    }

    pub async fn remove(&self, id: ContactId) -> Result<()> {
        self.coordinator.remove(id).await
    }

    pub async fn fetch(&self, id: ContactId) -> Result<ContactRecord> {
        self.coordinator.fetch(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCollection;

    #[test]
    fn test_zero_page_size_rejected() {
        let store = Arc::new(MemoryCollection::default());
        let config = SessionConfig {
            page_size: 0,
            ..SessionConfig::default()
        };
        let err = ContactsSession::new(store, config).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn test_initial_view_is_empty() {
        let store = Arc::new(MemoryCollection::default());
        let session = ContactsSession::new(store, SessionConfig::default()).unwrap();

        let published = session.view();
        assert_eq!(published.generation, 1);
        assert!(published.view.records.is_empty());
        assert_eq!(published.view.available_role_filters, vec!["All"]);
        assert!(published.sync_error.is_none());
    }

    #[test]
    fn test_query_edits_publish_new_generation() {
        let store = Arc::new(MemoryCollection::default());
        let session = ContactsSession::new(store, SessionConfig::default()).unwrap();
        let before = session.view().generation;

        session.set_search_term("acme");
        session.toggle_sort_order();

        let after = session.view();
        assert_eq!(after.generation, before + 2);
        assert_eq!(session.query().search_term(), "acme");
        assert_eq!(session.query().sort_order(), SortOrder::Desc);
    }

    #[test]
    fn test_page_moves_are_bounded() {
        let store = Arc::new(MemoryCollection::default());
        let session = ContactsSession::new(store, SessionConfig::default()).unwrap();
        assert!(!session.next_page());
        assert!(!session.prev_page());
        assert_eq!(session.query().page_index(), 0);
    }
}
