//! Mirror Driver — cursor-driven batch mirroring of catalog archives
//! (spec.md §4.10), plus the reachability Validator (spec.md §4.11).
//!
//! Concurrency follows the teacher's chunked `thread::spawn` pattern
//! (`engine_parallel::run_publish_level`): each batch is dispatched in
//! `max_threads`-sized chunks, waited on, then the next chunk starts.

pub mod filter;
pub mod layout;
pub mod validator;

pub use filter::IdFilter;
pub use layout::{Layout, select_root};

use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use catkeeper_core::{InternPool, ServiceIndex};
use catkeeper_fetch::FetchFabric;
use catkeeper_retry::{RetryPolicy, calculate_delay};
use catkeeper_store::ChangeLog;
use catkeeper_types::{CancelToken, CatalogEntry, FetchError, Logger};
use chrono::{DateTime, Utc};

/// When to write an archive that may already exist on disk (spec.md §4.10.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    FailIfExists,
    SkipIfExists,
    OverwriteIfNewer,
    Force,
}

/// Default delay subtracted from `now` when computing the traversal window
/// end, to avoid racing publishers still writing the newest commits
/// (spec.md §4.10 step 1).
pub const DEFAULT_DELAY_MINUTES: i64 = 10;

pub const DEFAULT_BATCH_SIZE: usize = 256;

pub struct MirrorConfig {
    pub roots: Vec<PathBuf>,
    pub layout: Layout,
    pub download_mode: DownloadMode,
    pub batch_size: usize,
    pub max_threads: usize,
    pub delay: Duration,
    pub filter: IdFilter,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            layout: Layout::V3,
            download_mode: DownloadMode::SkipIfExists,
            batch_size: DEFAULT_BATCH_SIZE,
            max_threads: catkeeper_core::DEFAULT_MAX_THREADS,
            delay: Duration::from_secs(DEFAULT_DELAY_MINUTES as u64 * 60),
            filter: IdFilter::default(),
        }
    }
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub entry_uri: String,
    pub written_path: Option<PathBuf>,
    pub error: Option<anyhow::Error>,
}

/// Run one mirror driver pass: resolve cursor, traverse and flatten the
/// window, filter, batch-dispatch download tasks, and advance the cursor
/// as batches complete (spec.md §4.10).
///
/// Returns the number of tasks that failed after exhausting retries; the
/// caller decides whether that makes the overall run a failure.
#[allow(clippy::too_many_arguments)]
pub fn run(
    fabric: &FetchFabric,
    service_index: &ServiceIndex,
    pool: &InternPool,
    logger: &dyn Logger,
    cancel: &CancelToken,
    output_root: &std::path::Path,
    package_base_uri: &str,
    config: &MirrorConfig,
) -> Result<usize> {
    let cursor = catkeeper_store::resolve_cursor(output_root)?;
    let end = Utc::now() - chrono::Duration::from_std(config.delay).unwrap_or_default();

    let mut entries =
        catkeeper_core::traverse_window(fabric, service_index, pool, logger, cancel, cursor, end, config.max_threads)?;
    entries.retain(|e| config.filter.matches(&e.id));
    entries.sort_by_key(|e| e.commit_timestamp);

    logger.info(&format!("mirror: {} entries selected for window ({cursor}, {end}]", entries.len()));

    let mut change_log = ChangeLog::open(output_root)?;
    let mut run_errors: Vec<anyhow::Error> = Vec::new();

    let batch_size = config.batch_size.max(1);
    let mut offset = 0;
    let mut batch_index = 0;
    while offset < entries.len() {
        cancel.check()?;
        let batch_end = (offset + batch_size).min(entries.len());
        let batch = &entries[offset..batch_end];
        logger.verbose(&format!("mirror: batch {batch_index} ({} entries)", batch.len()));

        let outcomes = run_batch(fabric, pool, logger, cancel, output_root, package_base_uri, config, batch);

        for outcome in outcomes {
            if let Some(path) = outcome.written_path {
                change_log.record(&path)?;
            }
            if let Some(error) = outcome.error {
                run_errors.push(error);
            }
        }

        let next_undequeued_timestamp = entries.get(batch_end).map(|e| e.commit_timestamp);
        let batch_latest = batch_latest_timestamp(batch.iter().map(|e| e.commit_timestamp), next_undequeued_timestamp);
        if let Some(t) = batch_latest {
            catkeeper_store::advance_cursor(output_root, t)?;
        }
        fabric.clear_cache();

        offset = batch_end;
        batch_index += 1;
    }

    // Queue fully drained: persist `end` outright, covering both the
    // empty-window case and the common case where the last batch's
    // entries all share a timestamp that a per-batch T* couldn't pass.
    catkeeper_store::advance_cursor(output_root, end)?;

    let error_count = run_errors.len();
    for error in &run_errors {
        logger.error(&format!("{error:#}"));
    }
    catkeeper_store::write_run_errors(output_root, &run_errors)?;
    Ok(error_count)
}

/// Newest timestamp in `batch` that is still safe to persist as the
/// resume cursor: strictly less than `next_undequeued`, the timestamp of
/// the first entry still sitting on the queue. A commit may have
/// siblings in that tail, and persisting past it here would let a crash
/// mid-batch resume and skip them (spec.md §4.10 step 6). `None` for
/// `next_undequeued` means the queue is fully drained, so every
/// timestamp in the batch is safe.
fn batch_latest_timestamp(
    batch: impl Iterator<Item = DateTime<Utc>>,
    next_undequeued: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    batch.filter(|ts| next_undequeued.is_none_or(|next| *ts < next)).max()
}

#[allow(clippy::too_many_arguments)]
fn run_batch(
    fabric: &FetchFabric,
    pool: &InternPool,
    logger: &dyn Logger,
    cancel: &CancelToken,
    output_root: &std::path::Path,
    package_base_uri: &str,
    config: &MirrorConfig,
    batch: &[CatalogEntry],
) -> Vec<TaskOutcome> {
    let outcomes: Mutex<Vec<Option<TaskOutcome>>> = Mutex::new((0..batch.len()).map(|_| None).collect());

    thread::scope(|scope| {
        for chunk_indices in (0..batch.len()).collect::<Vec<_>>().chunks(config.max_threads.max(1)) {
            let mut handles = Vec::with_capacity(chunk_indices.len());
            for &i in chunk_indices {
                let entry = &batch[i];
                let outcomes = &outcomes;
                let roots = &config.roots;
                let layout = config.layout;
                let download_mode = config.download_mode;

                handles.push(scope.spawn(move || {
                    let outcome =
                        download_one(fabric, pool, logger, cancel, output_root, package_base_uri, roots, layout, download_mode, entry);
                    outcomes.lock().unwrap()[i] = Some(outcome);
                }));
            }
            for handle in handles {
                handle.join().expect("download task thread panicked");
            }
        }
    });

    outcomes
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|o| o.expect("every index is filled by its chunk"))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn download_one(
    fabric: &FetchFabric,
    pool: &InternPool,
    logger: &dyn Logger,
    cancel: &CancelToken,
    output_root: &std::path::Path,
    package_base_uri: &str,
    roots: &[PathBuf],
    layout: Layout,
    download_mode: DownloadMode,
    entry: &CatalogEntry,
) -> TaskOutcome {
    let _ = pool;
    let archive_uri = catkeeper_core::uri::archive_uri(package_base_uri, &entry.id, &entry.version);
    let roots = if roots.is_empty() {
        vec![output_root.to_path_buf()]
    } else {
        roots.to_vec()
    };

    let policy = RetryPolicy::MirrorTask.to_config();
    let mut attempt = 1;
    loop {
        match try_download(fabric, logger, cancel, &roots, layout, download_mode, entry, &archive_uri) {
            Ok(written) => {
                return TaskOutcome {
                    entry_uri: entry.uri.clone(),
                    written_path: written,
                    error: None,
                };
            }
            Err(err) if is_not_found(&err) => {
                logger.warning(&format!("{archive_uri}: not found, treating as success"));
                return TaskOutcome {
                    entry_uri: entry.uri.clone(),
                    written_path: None,
                    error: None,
                };
            }
            Err(err) if attempt < policy.max_attempts => {
                logger.warning(&format!("{archive_uri}: attempt {attempt} failed: {err:#}"));
                thread::sleep(calculate_delay(&policy, attempt));
                attempt += 1;
            }
            Err(err) => {
                return TaskOutcome {
                    entry_uri: entry.uri.clone(),
                    written_path: None,
                    error: Some(err.context(format!("failed to mirror {archive_uri}"))),
                };
            }
        }
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FetchError>()
        .map(FetchError::is_not_found)
        .unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
fn try_download(
    fabric: &FetchFabric,
    logger: &dyn Logger,
    cancel: &CancelToken,
    roots: &[PathBuf],
    layout: Layout,
    download_mode: DownloadMode,
    entry: &CatalogEntry,
    archive_uri: &str,
) -> Result<Option<PathBuf>> {
    let dest_root = select_root(roots, &entry.id, &entry.version, layout);
    let dest = layout.archive_path(&dest_root, &entry.id, &entry.version);

    if !should_write(&dest, download_mode, entry.commit_timestamp)? {
        return Ok(None);
    }

    let response = fabric.fetch_archive(archive_uri, logger, cancel)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension("part");
    std::fs::copy(&response.cache_path, &tmp)?;
    std::fs::rename(&tmp, &dest)?;

    if matches!(layout, Layout::V3) {
        layout::write_v3_sidecars(&response.cache_path, &dest_root, &entry.id, &entry.version)?;
    }

    Ok(Some(dest))
}

fn should_write(dest: &std::path::Path, mode: DownloadMode, commit_timestamp: DateTime<Utc>) -> Result<bool> {
    if !dest.exists() {
        return Ok(true);
    }
    match mode {
        DownloadMode::FailIfExists => anyhow::bail!("{} already exists", dest.display()),
        DownloadMode::SkipIfExists => Ok(false),
        DownloadMode::Force => Ok(true),
        DownloadMode::OverwriteIfNewer => {
            let mtime = std::fs::metadata(dest)?.modified()?;
            let mtime: DateTime<Utc> = mtime.into();
            Ok(commit_timestamp > mtime)
        }
    }
}
