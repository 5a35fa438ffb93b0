//! Catalog Index Reader — page-range selection (spec.md §4.5).

use anyhow::{Context, Result};
use catkeeper_fetch::FetchFabric;
use catkeeper_types::{CancelToken, Logger};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::intern::InternPool;

/// One entry from the catalog root's `items[]` (spec.md §6.3).
#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub uri: String,
    pub commit_id: String,
    pub commit_timestamp: DateTime<Utc>,
}

/// Fetch the catalog root and parse its `items[]` into [`CatalogPage`]s.
/// An empty or missing `items` array is an empty catalog, not an error
/// (spec.md §9: "Page-size ≤ 0 and empty indexes").
pub fn fetch_catalog_pages(
    fabric: &FetchFabric,
    catalog_uri: &str,
    pool: &InternPool,
    logger: &dyn Logger,
    cancel: &CancelToken,
) -> Result<Vec<CatalogPage>> {
    let doc = fabric
        .fetch_json(catalog_uri, logger, cancel)
        .with_context(|| format!("failed to fetch catalog root {catalog_uri}"))?;
    parse_catalog_pages(&doc, pool)
}

fn parse_catalog_pages(doc: &Value, pool: &InternPool) -> Result<Vec<CatalogPage>> {
    let Some(items) = doc.get("items").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut pages = Vec::with_capacity(items.len());
    for item in items {
        let uri = item
            .get("@id")
            .and_then(Value::as_str)
            .context("catalog page item missing '@id'")?;
        let commit_id = item
            .get("commitId")
            .and_then(Value::as_str)
            .context("catalog page item missing 'commitId'")?;
        let raw_ts = item
            .get("commitTimeStamp")
            .and_then(Value::as_str)
            .context("catalog page item missing 'commitTimeStamp'")?;
        let commit_timestamp = pool
            .intern_timestamp(raw_ts)
            .map_err(anyhow::Error::msg)?;

        pages.push(CatalogPage {
            uri: pool.intern_str(uri).to_string(),
            commit_id: pool.intern_str(commit_id).to_string(),
            commit_timestamp,
        });
    }
    Ok(pages)
}

/// Select the page sublist for window `(start, end]` (spec.md §4.5).
///
/// Returns `I ∪ {A}` sorted ascending by commit timestamp, where `I` is
/// every page whose timestamp falls in `(start, end]` and `A` is the
/// single next page strictly after `end`, if one exists. `A` is included
/// because a page's declared timestamp is its *latest* commit — a commit
/// exactly at `end` could still live on the following page.
pub fn select_pages(pages: &[CatalogPage], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<CatalogPage> {
    let mut selected: Vec<CatalogPage> = pages
        .iter()
        .filter(|p| p.commit_timestamp > start && p.commit_timestamp <= end)
        .cloned()
        .collect();

    if let Some(next) = pages
        .iter()
        .filter(|p| p.commit_timestamp > end)
        .min_by_key(|p| p.commit_timestamp)
    {
        selected.push(next.clone());
    }

    selected.sort_by_key(|p| p.commit_timestamp);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn page(id: &str, ts: i64) -> CatalogPage {
        CatalogPage {
            uri: format!("https://example.com/page{id}.json"),
            commit_id: format!("commit-{id}"),
            commit_timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    #[test]
    fn selects_pages_strictly_after_start_and_up_to_end_inclusive() {
        let pages = vec![page("1", 10), page("2", 20), page("3", 30), page("4", 40)];
        let start = Utc.timestamp_opt(10, 0).unwrap();
        let end = Utc.timestamp_opt(30, 0).unwrap();
        let selected = select_pages(&pages, start, end);
        let ids: Vec<&str> = selected.iter().map(|p| p.commit_id.as_str()).collect();
        // page1 excluded (== start), page2/page3 included, page4 included
        // as the single next page after `end`.
        assert_eq!(ids, vec!["commit-2", "commit-3", "commit-4"]);
    }

    #[test]
    fn includes_only_the_single_nearest_page_after_end() {
        let pages = vec![page("1", 10), page("2", 40), page("3", 50)];
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let end = Utc.timestamp_opt(20, 0).unwrap();
        let selected = select_pages(&pages, start, end);
        let ids: Vec<&str> = selected.iter().map(|p| p.commit_id.as_str()).collect();
        assert_eq!(ids, vec!["commit-1", "commit-2"]);
    }

    #[test]
    fn empty_items_array_is_an_empty_catalog_not_an_error() {
        let doc = serde_json::json!({"items": []});
        let pool = InternPool::new();
        let pages = parse_catalog_pages(&doc, &pool).unwrap();
        assert!(pages.is_empty());
    }

    #[test]
    fn missing_items_array_is_an_empty_catalog() {
        let doc = serde_json::json!({});
        let pool = InternPool::new();
        let pages = parse_catalog_pages(&doc, &pool).unwrap();
        assert!(pages.is_empty());
    }
}
