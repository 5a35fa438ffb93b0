//! Cursor, change log, and error log persistence for the mirror driver
//! (spec.md §4.10 steps 1, 5, 6). Atomic write-then-rename throughout, the
//! same pattern the teacher uses for its own execution-state files.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CURSOR_FILE: &str = "cursor.json";
pub const UPDATED_FILES_LOG: &str = "updatedFiles.txt";
pub const LAST_RUN_ERRORS_LOG: &str = "lastRunErrors.txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorDocument {
    cursor: DateTime<Utc>,
}

fn cursor_path(root: &Path) -> PathBuf {
    root.join(CURSOR_FILE)
}

/// Read `cursor.json`, or `DateTime::<Utc>::MIN_UTC` ("min-time") if absent
/// (spec.md §4.10 step 1).
pub fn resolve_cursor(root: &Path) -> Result<DateTime<Utc>> {
    let path = cursor_path(root);
    if !path.exists() {
        return Ok(DateTime::<Utc>::MIN_UTC);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read cursor file {}", path.display()))?;
    let doc: CursorDocument = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse cursor JSON {}", path.display()))?;
    Ok(doc.cursor)
}

/// Persist `cursor.json`. Only called once a batch's commits have all been
/// handed off to the downloader (spec.md §3 invariant: "cursor safety").
pub fn advance_cursor(root: &Path, cursor: DateTime<Utc>) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("failed to create output root {}", root.display()))?;
    let path = cursor_path(root);
    let doc = CursorDocument { cursor };
    atomic_write_json(&path, &doc)
}

/// Append one successfully-written archive path to `updatedFiles.txt`
/// (spec.md §4.10 step 5). Accumulates across the whole run; callers open
/// once per run via [`ChangeLog::open`] rather than reopening per entry.
pub struct ChangeLog {
    file: fs::File,
}

impl ChangeLog {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("failed to create output root {}", root.display()))?;
        let path = root.join(UPDATED_FILES_LOG);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open change log {}", path.display()))?;
        Ok(Self { file })
    }

    pub fn record(&mut self, path: &Path) -> Result<()> {
        writeln!(self.file, "{}", path.display()).context("failed to append to change log")?;
        self.file.flush().ok();
        Ok(())
    }
}

/// Overwrite `lastRunErrors.txt` with one flattened line per error
/// (spec.md §4.10 step 5: "flattening nested aggregate errors"). Each
/// anyhow error's full context chain is rendered on a single line so the
/// file stays one-error-per-line even for deeply wrapped failures.
pub fn write_run_errors(root: &Path, errors: &[anyhow::Error]) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("failed to create output root {}", root.display()))?;
    let path = root.join(LAST_RUN_ERRORS_LOG);

    if errors.is_empty() {
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove stale {}", path.display()))?;
        }
        return Ok(());
    }

    let mut body = String::new();
    for error in errors {
        body.push_str(&flatten_error_chain(error));
        body.push('\n');
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, &path)
        .with_context(|| format!("failed to rename {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

fn flatten_error_chain(error: &anyhow::Error) -> String {
    error
        .chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        f.write_all(&data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }
    fs::rename(&tmp, path).with_context(|| {
        format!("failed to rename tmp file {} to {}", tmp.display(), path.display())
    })?;
    fsync_parent_dir(path);
    Ok(())
}

fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_cursor_returns_min_time_when_absent() {
        let dir = tempdir().unwrap();
        let cursor = resolve_cursor(dir.path()).unwrap();
        assert_eq!(cursor, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn advance_then_resolve_round_trips() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        advance_cursor(dir.path(), now).unwrap();
        let resolved = resolve_cursor(dir.path()).unwrap();
        assert_eq!(resolved, now);
    }

    #[test]
    fn change_log_appends_across_multiple_opens() {
        let dir = tempdir().unwrap();
        {
            let mut log = ChangeLog::open(dir.path()).unwrap();
            log.record(Path::new("a/1.0.0.nupkg")).unwrap();
        }
        {
            let mut log = ChangeLog::open(dir.path()).unwrap();
            log.record(Path::new("b/2.0.0.nupkg")).unwrap();
        }
        let content = fs::read_to_string(dir.path().join(UPDATED_FILES_LOG)).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn run_errors_are_flattened_one_per_line() {
        let dir = tempdir().unwrap();
        let inner = anyhow::anyhow!("transport failed");
        let wrapped = inner.context("failed to fetch archive");
        write_run_errors(dir.path(), std::slice::from_ref(&wrapped)).unwrap();
        let content = fs::read_to_string(dir.path().join(LAST_RUN_ERRORS_LOG)).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("failed to fetch archive"));
        assert!(content.contains("transport failed"));
    }

    #[test]
    fn run_errors_are_removed_once_a_clean_run_follows() {
        let dir = tempdir().unwrap();
        write_run_errors(dir.path(), &[anyhow::anyhow!("first run error")]).unwrap();
        assert!(dir.path().join(LAST_RUN_ERRORS_LOG).exists());
        write_run_errors(dir.path(), &[]).unwrap();
        assert!(!dir.path().join(LAST_RUN_ERRORS_LOG).exists());
    }
}
