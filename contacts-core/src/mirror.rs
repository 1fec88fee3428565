//! Immutable local copy of a remote collection.
//!
//! A `Mirror` is a value: it is built once from a notification's full record
//! set and never patched. Cloning shares the underlying map, so a reader
//! holding an older mirror is unaffected when a newer one replaces it.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::record::{ContactId, ContactRecord};

#[derive(Debug, Clone, Default)]
pub struct Mirror {
    /// Records keyed by id, in the order the notification delivered them
    records: Arc<IndexMap<ContactId, ContactRecord>>,
}

impl Mirror {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a mirror from a notification's record set.
    ///
    /// Ids are expected to be unique. If a store violates that, the first
    /// occurrence keeps its position and the last occurrence's fields win.
    pub fn from_records(records: impl IntoIterator<Item = ContactRecord>) -> Self {
        let mut map = IndexMap::new();
        for record in records {
            if let Some(previous) = map.insert(record.id, record) {
                log::debug!("Duplicate contact id {} in snapshot", previous.id);
            }
        }
        Self {
            records: Arc::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &ContactId) -> Option<&ContactRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &ContactId) -> bool {
        self.records.contains_key(id)
    }

    /// Records in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = &ContactRecord> {
        self.records.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContactId> {
        self.records.keys()
    }

    pub fn to_vec(&self) -> Vec<ContactRecord> {
        self.records.values().cloned().collect()
    }

    /// Whether two mirrors share the same backing snapshot.
    pub fn ptr_eq(&self, other: &Mirror) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }
}

impl PartialEq for Mirror {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.iter().eq(other.iter())
    }
}

impl Eq for Mirror {}

impl FromIterator<ContactRecord> for Mirror {
    fn from_iter<T: IntoIterator<Item = ContactRecord>>(iter: T) -> Self {
        Self::from_records(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> ContactRecord {
        ContactRecord::new(ContactId::new(), name, "", "")
    }

    #[test]
    fn test_mirror_preserves_delivery_order() {
        let records = vec![record("Zed"), record("Ann"), record("Mo")];
        let mirror = Mirror::from_records(records.clone());

        assert_eq!(mirror.len(), 3);
        let names: Vec<&str> = mirror.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Zed", "Ann", "Mo"]);
        assert_eq!(mirror.get(&records[1].id).unwrap().name, "Ann");
    }

    #[test]
    fn test_mirror_duplicate_ids_keep_first_position() {
        let id = ContactId::new();
        let mirror = Mirror::from_records(vec![
            ContactRecord::new(id, "Old", "", ""),
            record("Other"),
            ContactRecord::new(id, "New", "", ""),
        ]);

        assert_eq!(mirror.len(), 2);
        let first = mirror.iter().next().unwrap();
        assert_eq!(first.id, id);
        assert_eq!(first.name, "New");
    }

    #[test]
    fn test_mirror_clone_is_shared_value() {
        let old = Mirror::from_records(vec![record("Ann")]);
        let held = old.clone();
        assert!(held.ptr_eq(&old));

        // A replacement never touches the mirror a reader still holds
        let replacement = Mirror::from_records(vec![record("Ann"), record("Bo")]);
        assert_eq!(held.len(), 1);
        assert_eq!(replacement.len(), 2);
        assert_ne!(held, replacement);
    }

    #[test]
    fn test_empty_mirror() {
        let mirror = Mirror::empty();
        assert!(mirror.is_empty());
        assert_eq!(mirror.iter().count(), 0);
        assert_eq!(mirror, Mirror::from_records(Vec::new()));
    }
}
