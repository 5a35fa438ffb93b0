//! Feed Reader — catalog-less mode (spec.md §4.9).
//!
//! For repositories that expose a package-base-address index but no
//! catalog. Enumerates versions per id directly from
//! `{packageBase}/{id}/index.json` rather than walking catalog pages.

use anyhow::{Context, Result};
use catkeeper_fetch::FetchFabric;
use catkeeper_types::{CancelToken, CatalogEntry, EntryKind, Logger};
use chrono::{DateTime, Utc};

use crate::intern::InternPool;
use crate::service_index::ServiceIndex;
use crate::uri::package_base_index_uri;

/// "Does this feed have a catalog?" probe (spec.md §4.9). Absence of the
/// catalog service type is a successful negative, not an error.
pub fn has_catalog(service_index: &ServiceIndex) -> bool {
    service_index.catalog_uri_opt().is_some()
}

/// Fetch `{packageBase}/{id}/index.json` for every id in `ids` and
/// materialize one [`CatalogEntry`]-shaped record per `(id, version)`.
/// Commit metadata is unknown in this mode: `commit_id` is empty and
/// `commit_timestamp` is the Unix epoch, so callers sort such entries as
/// "oldest" rather than fabricating a plausible-looking time.
pub fn read_feed(
    fabric: &FetchFabric,
    package_base: &str,
    ids: &[String],
    pool: &InternPool,
    logger: &dyn Logger,
    cancel: &CancelToken,
) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    for id in ids {
        cancel.check()?;
        let index_uri = package_base_index_uri(package_base, id);
        let doc = fabric
            .fetch_json(&index_uri, logger, cancel)
            .with_context(|| format!("failed to fetch package index {index_uri}"))?;

        let Some(versions) = doc.get("versions").and_then(|v| v.as_array()) else {
            logger.warning(&format!("{index_uri} has no 'versions' array, skipping"));
            continue;
        };

        for raw_version in versions {
            let Some(raw_version) = raw_version.as_str() else {
                continue;
            };
            let version = pool
                .intern_version(raw_version)
                .map_err(anyhow::Error::msg)?;
            entries.push(CatalogEntry {
                uri: pool.intern_str(&index_uri).to_string(),
                kind: EntryKind::AddOrUpdate,
                commit_id: String::new(),
                commit_timestamp: epoch(),
                id: pool.intern_str(id).to_string(),
                version: (*version).clone(),
            });
        }
    }
    Ok(entries)
}

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).expect("epoch is a valid timestamp")
}
