//! Flattener — reduce raw catalog entries to the live package set (spec.md §4.7).

use std::collections::HashMap;

use catkeeper_types::{CatalogEntry, EntryIdentity};

/// Collapse entries that share an [`EntryIdentity`] down to the one with
/// the latest `commit_timestamp`. An identity whose latest entry is a
/// delete is dropped entirely — deletes shadow every earlier add/update
/// for the same identity, they do not themselves appear in the output
/// (spec.md §4.7, §3 invariant: "identity survives iff its most recent
/// event is an add-or-update").
pub fn flatten(entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let mut latest: HashMap<EntryIdentity, CatalogEntry> = HashMap::with_capacity(entries.len());

    for entry in entries {
        let identity = entry.identity();
        match latest.get(&identity) {
            Some(existing) if existing.commit_timestamp >= entry.commit_timestamp => {}
            _ => {
                latest.insert(identity, entry);
            }
        }
    }

    latest.into_values().filter(CatalogEntry::is_add_or_update).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use catkeeper_types::{EntryKind, PackageVersion};
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, version: &str, ts: i64, kind: EntryKind) -> CatalogEntry {
        CatalogEntry {
            uri: format!("https://example.com/{id}.json"),
            kind,
            commit_id: format!("commit-{ts}"),
            commit_timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            id: id.to_string(),
            version: PackageVersion::parse(version).unwrap(),
        }
    }

    #[test]
    fn keeps_only_the_latest_event_per_identity() {
        let entries = vec![
            entry("a", "1.0.0", 10, EntryKind::AddOrUpdate),
            entry("a", "1.0.0", 20, EntryKind::AddOrUpdate),
        ];
        let flat = flatten(entries);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].commit_id, "commit-20");
    }

    #[test]
    fn a_trailing_delete_removes_the_identity_entirely() {
        let entries = vec![
            entry("a", "1.0.0", 10, EntryKind::AddOrUpdate),
            entry("a", "1.0.0", 20, EntryKind::Delete),
        ];
        let flat = flatten(entries);
        assert!(flat.is_empty());
    }

    #[test]
    fn a_re_add_after_a_delete_restores_the_identity() {
        let entries = vec![
            entry("a", "1.0.0", 10, EntryKind::AddOrUpdate),
            entry("a", "1.0.0", 20, EntryKind::Delete),
            entry("a", "1.0.0", 30, EntryKind::AddOrUpdate),
        ];
        let flat = flatten(entries);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].commit_id, "commit-30");
    }

    #[test]
    fn distinct_versions_of_the_same_id_are_independent_identities() {
        let entries = vec![
            entry("a", "1.0.0", 10, EntryKind::AddOrUpdate),
            entry("a", "2.0.0", 10, EntryKind::AddOrUpdate),
        ];
        let flat = flatten(entries);
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn out_of_order_input_still_resolves_to_the_latest_event() {
        let entries = vec![
            entry("a", "1.0.0", 20, EntryKind::Delete),
            entry("a", "1.0.0", 10, EntryKind::AddOrUpdate),
        ];
        let flat = flatten(entries);
        assert!(flat.is_empty());
    }
}
