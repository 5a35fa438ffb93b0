//! Package Set Projector — group the live entry set by package id (spec.md §4.8).

use std::collections::BTreeMap;

use catkeeper_types::{CatalogEntry, PackageVersion};

/// One package id and the sorted set of live versions it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersions {
    /// The id as it appeared on the winning entry — display casing is
    /// whichever entry happened to be retained, not necessarily the
    /// original casing of every contributing event (spec.md §4.8).
    pub id: String,
    pub versions: Vec<PackageVersion>,
}

/// Group flattened [`CatalogEntry`]s by case-insensitive package id,
/// producing one [`PackageVersions`] per id with its versions sorted
/// ascending and de-duplicated by normalized form.
pub fn project(entries: &[CatalogEntry]) -> Vec<PackageVersions> {
    let mut by_id: BTreeMap<String, (String, Vec<PackageVersion>)> = BTreeMap::new();

    for entry in entries {
        let key = entry.id.to_ascii_lowercase();
        let group = by_id
            .entry(key)
            .or_insert_with(|| (entry.id.clone(), Vec::new()));
        group.1.push(entry.version.clone());
    }

    by_id
        .into_values()
        .map(|(id, mut versions)| {
            versions.sort();
            versions.dedup_by(|a, b| a.normalized() == b.normalized());
            PackageVersions { id, versions }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use catkeeper_types::EntryKind;
    use chrono::Utc;

    fn entry(id: &str, version: &str) -> CatalogEntry {
        CatalogEntry {
            uri: format!("https://example.com/{id}.json"),
            kind: EntryKind::AddOrUpdate,
            commit_id: "c".to_string(),
            commit_timestamp: Utc::now(),
            id: id.to_string(),
            version: PackageVersion::parse(version).unwrap(),
        }
    }

    #[test]
    fn groups_versions_under_a_single_case_insensitive_id() {
        let entries = vec![entry("PackageA", "1.0.0"), entry("packagea", "2.0.0")];
        let projected = project(&entries);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].versions.len(), 2);
    }

    #[test]
    fn versions_are_sorted_ascending() {
        let entries = vec![entry("a", "2.0.0"), entry("a", "1.0.0"), entry("a", "1.5.0")];
        let projected = project(&entries);
        let rendered: Vec<String> = projected[0]
            .versions
            .iter()
            .map(|v| v.normalized().to_string())
            .collect();
        assert_eq!(rendered, vec!["1.0.0.0", "1.5.0.0", "2.0.0.0"]);
    }

    #[test]
    fn duplicate_normalized_versions_collapse_to_one() {
        let entries = vec![entry("a", "1.0.0+meta1"), entry("a", "1.0.0+meta2")];
        let projected = project(&entries);
        assert_eq!(projected[0].versions.len(), 1);
    }

    #[test]
    fn distinct_ids_produce_distinct_groups() {
        let entries = vec![entry("a", "1.0.0"), entry("b", "1.0.0")];
        let projected = project(&entries);
        assert_eq!(projected.len(), 2);
    }
}
