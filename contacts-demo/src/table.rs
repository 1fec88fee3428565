//! Plain-text rendering of a published view.
//!
//! Stands in for a presentation layer: it only ever reads a `SessionView`.

use contacts_sync::SessionView;

const NAME_WIDTH: usize = 16;
const COMPANY_WIDTH: usize = 14;

fn cell(value: &str, width: usize) -> String {
    let shown: String = value.chars().take(width).collect();
    format!("{shown:<width$}")
}

/// Render the current page as an aligned table with a pager footer.
pub fn render(published: &SessionView) -> String {
    let view = &published.view;
    let mut out = String::new();

    out.push_str(&format!(
        "{} {} {}\n",
        cell("NAME", NAME_WIDTH),
        cell("COMPANY", COMPANY_WIDTH),
        "ROLE"
    ));
    if view.records.is_empty() {
        out.push_str("  (no contacts)\n");
    }
    for record in &view.records {
        out.push_str(&format!(
            "{} {} {}\n",
            cell(&record.name, NAME_WIDTH),
            cell(&record.company, COMPANY_WIDTH),
            record.role
        ));
    }

    out.push_str(&format!(
        "{} page {}/{} {}  ({} matching, roles: {})",
        if view.can_go_prev { "<" } else { " " },
        view.page_index.saturating_add(1),
        view.total_pages,
        if view.can_go_next { ">" } else { " " },
        view.filtered_count,
        view.available_role_filters.join(", ")
    ));
    if let Some(error) = &published.sync_error {
        out.push_str(&format!("\n  sync stopped: {error}"));
    }
    out
}
