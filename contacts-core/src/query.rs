//! Filter, sort and pagination parameters chosen by the user.
//!
//! Page reset policy:
//! - a new mirror snapshot resets `page_index` to 0
//! - changing the sort field resets `page_index` to 0
//! - search, role filter and sort direction edits leave `page_index` alone

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CollectionError, Result};
use crate::pipeline::DerivedView;
use crate::record::ContactRecord;

/// Rows per page when nothing else is configured.
pub const DEFAULT_PAGE_SIZE: usize = 5;

/// Label of the role filter that passes every record.
pub const ALL_ROLES: &str = "All";

/// Field the view is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Name,
    Company,
    Role,
}

impl SortField {
    /// The record's value for this field.
    pub fn value_of<'a>(&self, record: &'a ContactRecord) -> &'a str {
        match self {
            SortField::Name => &record.name,
            SortField::Company => &record.company,
            SortField::Role => &record.role,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortField::Name => write!(f, "name"),
            SortField::Company => write!(f, "company"),
            SortField::Role => write!(f, "role"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// Either every role, or exactly one role value (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoleFilter {
    #[default]
    All,
    Only(String),
}

impl RoleFilter {
    pub fn matches(&self, record: &ContactRecord) -> bool {
        match self {
            RoleFilter::All => true,
            RoleFilter::Only(role) => record.role == *role,
        }
    }

    /// The label shown in a role picker.
    pub fn label(&self) -> &str {
        match self {
            RoleFilter::All => ALL_ROLES,
            RoleFilter::Only(role) => role,
        }
    }
}

impl From<&str> for RoleFilter {
    fn from(label: &str) -> Self {
        if label == ALL_ROLES {
            RoleFilter::All
        } else {
            RoleFilter::Only(label.to_string())
        }
    }
}

impl From<String> for RoleFilter {
    fn from(label: String) -> Self {
        if label == ALL_ROLES {
            RoleFilter::All
        } else {
            RoleFilter::Only(label)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    search_term: String,
    role_filter: RoleFilter,
    sort_field: SortField,
    sort_order: SortOrder,
    page_index: usize,
    page_size: usize,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            search_term: String::new(),
            role_filter: RoleFilter::All,
            sort_field: SortField::Name,
            sort_order: SortOrder::Asc,
            page_index: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueryState {
    /// Create a query with the given page size. A page size of 0 is rejected.
    pub fn with_page_size(page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(CollectionError::Validation(
                "page size must be positive".to_string(),
            ));
        }
        Ok(Self {
            page_size,
            ..Self::default()
        })
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn role_filter(&self) -> &RoleFilter {
        &self.role_filter
    }

    pub fn sort_field(&self) -> SortField {
        self.sort_field
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    pub fn set_role_filter(&mut self, filter: impl Into<RoleFilter>) {
        self.role_filter = filter.into();
    }

    pub fn set_sort_field(&mut self, field: SortField) {
        self.sort_field = field;
        self.page_index = 0;
    }

    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.sort_order = order;
    }

    pub fn toggle_sort_order(&mut self) {
        self.sort_order = self.sort_order.toggled();
    }

    /// Jump to a page. The index is not clamped here; the pipeline reports an
    /// out-of-range page through `DerivedView::page_in_range`.
    pub fn set_page_index(&mut self, page_index: usize) {
        self.page_index = page_index;
    }

    /// A fresh snapshot reshuffles content, so the page position is dropped.
    pub fn on_snapshot(&mut self) {
        self.page_index = 0;
    }

    /// Advance one page if the view allows it. Returns whether it moved.
    pub fn next_page(&mut self, view: &DerivedView) -> bool {
        if view.can_go_next {
            self.page_index += 1;
            true
        } else {
            false
        }
    }

    /// Go back one page if the view allows it. Returns whether it moved.
    pub fn prev_page(&mut self, view: &DerivedView) -> bool {
        if view.can_go_prev && self.page_index > 0 {
            self.page_index -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let q = QueryState::default();
        assert_eq!(q.search_term(), "");
        assert_eq!(q.role_filter(), &RoleFilter::All);
        assert_eq!(q.sort_field(), SortField::Name);
        assert_eq!(q.sort_order(), SortOrder::Asc);
        assert_eq!(q.page_index(), 0);
        assert_eq!(q.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        assert!(QueryState::with_page_size(0).unwrap_err().is_validation());
        assert_eq!(QueryState::with_page_size(3).unwrap().page_size(), 3);
    }

    #[test]
    fn test_filter_edits_keep_page() {
        let mut q = QueryState::default();
        q.set_page_index(2);

        q.set_search_term("acme");
        assert_eq!(q.page_index(), 2);

        q.set_role_filter("PM");
        assert_eq!(q.page_index(), 2);

        q.toggle_sort_order();
        assert_eq!(q.sort_order(), SortOrder::Desc);
        assert_eq!(q.page_index(), 2);
    }

    #[test]
    fn test_sort_field_and_snapshot_reset_page() {
        let mut q = QueryState::default();
        q.set_page_index(3);
        q.set_sort_field(SortField::Company);
        assert_eq!(q.page_index(), 0);

        q.set_page_index(1);
        q.on_snapshot();
        assert_eq!(q.page_index(), 0);
    }

    #[test]
    fn test_role_filter_from_label() {
        assert_eq!(RoleFilter::from("All"), RoleFilter::All);
        assert_eq!(RoleFilter::from("Eng"), RoleFilter::Only("Eng".into()));
        // Exact label match only
        assert_eq!(RoleFilter::from("all"), RoleFilter::Only("all".into()));
        assert_eq!(RoleFilter::Only("Eng".into()).label(), "Eng");
    }

    #[test]
    fn test_sort_field_serde_lowercase() {
        let json = serde_json::to_string(&SortField::Company).unwrap();
        assert_eq!(json, r#""company""#);
        let order: SortOrder = serde_json::from_str(r#""desc""#).unwrap();
        assert_eq!(order, SortOrder::Desc);
    }
}
