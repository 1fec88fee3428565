//! Aggregate figures over the whole mirror, for dashboard-style displays.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::mirror::Mirror;

/// Role label used when counting records without a role.
pub const UNKNOWN_ROLE: &str = "Unknown";

/// How many companies `recent_companies` lists.
pub const RECENT_COMPANY_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSummary {
    pub total: usize,
    /// (role, count) in first-seen order
    pub role_distribution: Vec<(String, usize)>,
    /// Company of the first records in mirror order
    pub recent_companies: Vec<String>,
}

impl MirrorSummary {
    pub fn from_mirror(mirror: &Mirror) -> Self {
        let mut roles: IndexMap<&str, usize> = IndexMap::new();
        for record in mirror.iter() {
            let role = if record.role.is_empty() {
                UNKNOWN_ROLE
            } else {
                record.role.as_str()
            };
            *roles.entry(role).or_insert(0) += 1;
        }

        Self {
            total: mirror.len(),
            role_distribution: roles
                .into_iter()
                .map(|(role, count)| (role.to_string(), count))
                .collect(),
            recent_companies: mirror
                .iter()
                .take(RECENT_COMPANY_LIMIT)
                .map(|r| r.company.clone())
                .collect(),
        }
    }

    pub fn count_for(&self, role: &str) -> usize {
        self.role_distribution
            .iter()
            .find(|(r, _)| r == role)
            .map_or(0, |(_, count)| *count)
    }
}
