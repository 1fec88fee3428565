//! Pure derivation of the visible page from a mirror and a query.
//!
//! ```text
//! Mirror ──► search filter ──► role filter ──► stable sort ──► page slice
//!    │                                                            │
//!    └──────────────► role options (full mirror) ─────────────────┴──► DerivedView
//! ```
//!
//! `derive_view` has no hidden state: the same inputs always give the same
//! output, and neither input is modified.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::mirror::Mirror;
use crate::query::{QueryState, SortOrder, ALL_ROLES};
use crate::record::ContactRecord;

/// Role option shown for records without a role.
pub const OTHER_ROLE: &str = "Other";

/// What the presentation layer renders for one (mirror, query) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedView {
    /// The current page, at most `page_size` long
    pub records: Vec<ContactRecord>,
    /// `ceil(filtered_count / page_size)`, but never less than 1
    pub total_pages: usize,
    pub can_go_prev: bool,
    pub can_go_next: bool,
    /// "All" first, then each distinct role of the full mirror in first-seen order
    pub available_role_filters: Vec<String>,
    /// Records surviving search and role filtering, across all pages
    pub filtered_count: usize,
    /// The page index that was requested
    pub page_index: usize,
    /// False when `page_index` points past the last page
    pub page_in_range: bool,
}

impl DerivedView {
    /// The nearest valid page for the requested index.
    pub fn clamped_page_index(&self) -> usize {
        self.page_index.min(self.total_pages.saturating_sub(1))
    }

    pub fn is_empty(&self) -> bool {
        self.filtered_count == 0
    }
}

/// Case-insensitive substring match over name, company and role.
fn matches_search(record: &ContactRecord, term_lower: &str) -> bool {
    if term_lower.is_empty() {
        return true;
    }
    record.name.to_lowercase().contains(term_lower)
        || record.company.to_lowercase().contains(term_lower)
        || record.role.to_lowercase().contains(term_lower)
}

/// Filter and sort the mirror according to `query`, without paginating.
pub fn filter_and_sort<'a>(mirror: &'a Mirror, query: &QueryState) -> Vec<&'a ContactRecord> {
    let term = query.search_term().to_lowercase();
    let role_filter = query.role_filter();
    let field = query.sort_field();

    let mut keyed: Vec<(String, &ContactRecord)> = mirror
        .iter()
        .filter(|r| matches_search(r, &term))
        .filter(|r| role_filter.matches(r))
        .map(|r| (field.value_of(r).to_lowercase(), r))
        .collect();

    // sort_by is stable: equal keys keep mirror order in both directions
    match query.sort_order() {
        SortOrder::Asc => keyed.sort_by(|a, b| a.0.cmp(&b.0)),
        SortOrder::Desc => keyed.sort_by(|a, b| b.0.cmp(&a.0)),
    }

    keyed.into_iter().map(|(_, r)| r).collect()
}

/// Role options for the full mirror: "All", then each role in first-seen
/// order, with empty roles listed as "Other".
pub fn available_role_filters(mirror: &Mirror) -> Vec<String> {
    let mut roles: IndexSet<&str> = IndexSet::with_capacity(mirror.len() + 1);
    roles.insert(ALL_ROLES);
    for record in mirror.iter() {
        if record.role.is_empty() {
            roles.insert(OTHER_ROLE);
        } else {
            roles.insert(record.role.as_str());
        }
    }
    roles.into_iter().map(str::to_string).collect()
}

/// Derive the visible page.
pub fn derive_view(mirror: &Mirror, query: &QueryState) -> DerivedView {
    let filtered = filter_and_sort(mirror, query);
    let filtered_count = filtered.len();
    let page_size = query.page_size().max(1);
    let page_index = query.page_index();

    let total_pages = filtered_count.div_ceil(page_size).max(1);
    let page_in_range = page_index < total_pages;

    let records = if page_in_range {
        let start = page_index * page_size;
        filtered
            .into_iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let view = DerivedView {
        records,
        total_pages,
        can_go_prev: page_index > 0,
        can_go_next: page_index.saturating_add(1) < total_pages,
        available_role_filters: available_role_filters(mirror),
        filtered_count,
        page_index,
        page_in_range,
    };

    log::trace!(
        "Derived page {}/{} ({} of {} records match)",
        page_index.saturating_add(1),
        total_pages,
        filtered_count,
        mirror.len()
    );

    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{RoleFilter, SortField};
    use crate::record::ContactId;

    fn rec(name: &str, company: &str, role: &str) -> ContactRecord {
        ContactRecord::new(ContactId::new(), name, company, role)
    }

    fn ann_and_bo() -> Mirror {
        Mirror::from_records(vec![rec("Ann", "Acme", "PM"), rec("Bo", "Zen", "Eng")])
    }

    fn names(view: &DerivedView) -> Vec<&str> {
        view.records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_default_query_lists_everything() {
        let view = derive_view(&ann_and_bo(), &QueryState::default());
        assert_eq!(names(&view), vec!["Ann", "Bo"]);
        assert_eq!(view.total_pages, 1);
        assert!(!view.can_go_prev);
        assert!(!view.can_go_next);
        assert!(view.page_in_range);
        assert_eq!(view.filtered_count, 2);
    }

    #[test]
    fn test_search_is_case_insensitive_over_all_fields() {
        let mirror = ann_and_bo();
        let mut q = QueryState::default();

        q.set_search_term("zen");
        assert_eq!(names(&derive_view(&mirror, &q)), vec!["Bo"]);

        q.set_search_term("ACM");
        assert_eq!(names(&derive_view(&mirror, &q)), vec!["Ann"]);

        q.set_search_term("pm");
        assert_eq!(names(&derive_view(&mirror, &q)), vec!["Ann"]);

        q.set_search_term("nobody");
        let view = derive_view(&mirror, &q);
        assert!(view.records.is_empty());
        assert!(view.is_empty());
        assert_eq!(view.total_pages, 1);
        assert!(!view.can_go_prev && !view.can_go_next);
    }

    #[test]
    fn test_role_filter_is_exact() {
        let mirror = Mirror::from_records(vec![
            rec("Ann", "Acme", "PM"),
            rec("Bo", "Zen", "Eng"),
            rec("Cy", "Zen", "eng"),
        ]);
        let mut q = QueryState::default();
        q.set_role_filter("Eng");
        assert_eq!(names(&derive_view(&mirror, &q)), vec!["Bo"]);

        q.set_role_filter(RoleFilter::All);
        assert_eq!(derive_view(&mirror, &q).filtered_count, 3);
    }

    #[test]
    fn test_sort_descending_and_by_role() {
        let mirror = ann_and_bo();
        let mut q = QueryState::default();
        q.toggle_sort_order();
        assert_eq!(names(&derive_view(&mirror, &q)), vec!["Bo", "Ann"]);

        q.set_sort_field(SortField::Role);
        // "eng" < "pm", descending puts Ann first
        assert_eq!(names(&derive_view(&mirror, &q)), vec!["Ann", "Bo"]);
    }

    #[test]
    fn test_sort_is_case_insensitive() {
        let mirror = Mirror::from_records(vec![rec("bob", "", ""), rec("Alice", "", ""), rec("carl", "", "")]);
        let view = derive_view(&mirror, &QueryState::default());
        assert_eq!(names(&view), vec!["Alice", "bob", "carl"]);
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let mirror = Mirror::from_records(vec![
            rec("Zoe", "Acme", ""),
            rec("Ann", "acme", ""),
            rec("Mo", "Beta", ""),
            rec("Bo", "ACME", ""),
        ]);
        let mut q = QueryState::default();
        q.set_sort_field(SortField::Company);
        assert_eq!(names(&derive_view(&mirror, &q)), vec!["Zoe", "Ann", "Bo", "Mo"]);

        q.set_sort_order(SortOrder::Desc);
        assert_eq!(names(&derive_view(&mirror, &q)), vec!["Mo", "Zoe", "Ann", "Bo"]);
    }

    #[test]
    fn test_pagination() {
        let mirror = ann_and_bo();
        let mut q = QueryState::with_page_size(1).unwrap();
        q.set_page_index(1);

        let view = derive_view(&mirror, &q);
        assert_eq!(names(&view), vec!["Bo"]);
        assert_eq!(view.total_pages, 2);
        assert!(view.can_go_prev);
        assert!(!view.can_go_next);
    }

    #[test]
    fn test_out_of_range_page_is_empty_not_error() {
        let mirror = ann_and_bo();
        let mut q = QueryState::with_page_size(1).unwrap();
        q.set_page_index(5);

        let view = derive_view(&mirror, &q);
        assert!(view.records.is_empty());
        assert!(!view.page_in_range);
        assert!(view.can_go_prev);
        assert!(!view.can_go_next);
        assert_eq!(view.clamped_page_index(), 1);
    }

    #[test]
    fn test_largest_page_index_is_out_of_range() {
        let mirror = Mirror::from_records(vec![rec("Ann", "Acme", "PM")]);
        let mut q = QueryState::default();
        q.set_page_index(usize::MAX);

        let view = derive_view(&mirror, &q);
        assert!(view.records.is_empty());
        assert!(!view.page_in_range);
        assert!(view.can_go_prev);
        assert!(!view.can_go_next);
        assert_eq!(view.clamped_page_index(), 0);

        // Stepping forward from there stays put
        assert!(!q.next_page(&view));
        assert_eq!(q.page_index(), usize::MAX);
    }

    #[test]
    fn test_page_never_exceeds_page_size() {
        let mirror: Mirror = (0..23).map(|i| rec(&format!("c{i:02}"), "", "")).collect();
        let mut q = QueryState::default();
        for page in 0..6 {
            q.set_page_index(page);
            let view = derive_view(&mirror, &q);
            assert!(view.records.len() <= q.page_size());
            assert_eq!(view.total_pages, 5);
        }
        q.set_page_index(4);
        assert_eq!(derive_view(&mirror, &q).records.len(), 3);
    }

    #[test]
    fn test_role_filters_cover_full_mirror() {
        let mirror = Mirror::from_records(vec![
            rec("Ann", "", "PM"),
            rec("Bo", "", ""),
            rec("Cy", "", "Eng"),
            rec("Di", "", "PM"),
        ]);
        let mut q = QueryState::default();
        q.set_search_term("ann");

        let view = derive_view(&mirror, &q);
        assert_eq!(view.records.len(), 1);
        assert_eq!(view.available_role_filters, vec!["All", "PM", "Other", "Eng"]);
    }

    #[test]
    fn test_role_filter_never_increases_count() {
        let mirror = Mirror::from_records(vec![
            rec("Ann", "", "PM"),
            rec("Bo", "", "Eng"),
            rec("Cy", "", "PM"),
        ]);
        let all = derive_view(&mirror, &QueryState::default()).filtered_count;
        for role in available_role_filters(&mirror) {
            let mut q = QueryState::default();
            q.set_role_filter(role.as_str());
            assert!(derive_view(&mirror, &q).filtered_count <= all);
        }
    }

    #[test]
    fn test_derive_is_deterministic() {
        let mirror = ann_and_bo();
        let q = QueryState::default();
        assert_eq!(derive_view(&mirror, &q), derive_view(&mirror, &q));
    }

    #[test]
    fn test_empty_mirror() {
        let view = derive_view(&Mirror::empty(), &QueryState::default());
        assert!(view.records.is_empty());
        assert!(!view.can_go_prev);
        assert!(!view.can_go_next);
        assert_eq!(view.available_role_filters, vec!["All"]);
    }
}
