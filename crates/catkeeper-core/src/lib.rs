//! Catalog traversal core for catkeeper: service index resolution, catalog
//! page selection, bounded-concurrency page reads, flattening, and the
//! catalog-less feed reader.
//!
//! A typical traversal chains these modules in order: [`service_index`]
//! resolves the repository root once, [`index_reader`] fetches the catalog
//! and selects the page sublist for a window, [`page_reader`] materializes
//! those pages' entries concurrently, [`flatten`] collapses them to the
//! live set, and [`projector`] groups the live set by package id.

pub mod feed_reader;
pub mod flatten;
pub mod index_reader;
pub mod intern;
pub mod page_reader;
pub mod projector;
pub mod service_index;
pub mod uri;

pub use feed_reader::{has_catalog, read_feed};
pub use flatten::flatten as flatten_entries;
pub use index_reader::{CatalogPage, fetch_catalog_pages, select_pages};
pub use intern::InternPool;
pub use page_reader::{DEFAULT_MAX_THREADS, read_pages};
pub use projector::{PackageVersions, project};
pub use service_index::ServiceIndex;

use anyhow::{Context, Result};
use catkeeper_fetch::FetchFabric;
use catkeeper_types::{CancelToken, CatalogEntry, Logger};
use chrono::{DateTime, Utc};

/// Run the §4.5–§4.7 pipeline over window `(start, end]` against a
/// catalog-backed feed: resolve the catalog root, select the page
/// sublist, read it concurrently, and flatten to the live entry set.
#[allow(clippy::too_many_arguments)]
pub fn traverse_window(
    fabric: &FetchFabric,
    service_index: &ServiceIndex,
    pool: &InternPool,
    logger: &dyn Logger,
    cancel: &CancelToken,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_threads: usize,
) -> Result<Vec<CatalogEntry>> {
    let catalog_uri = service_index
        .catalog_uri()
        .context("repository does not expose a catalog service")?;
    let pages = fetch_catalog_pages(fabric, &catalog_uri, pool, logger, cancel)?;
    let selected = select_pages(&pages, start, end);
    logger.verbose(&format!("selected {} of {} catalog pages", selected.len(), pages.len()));
    let entries = read_pages(fabric, &selected, pool, logger, cancel, start, end, max_threads)?;
    Ok(flatten::flatten(entries))
}
