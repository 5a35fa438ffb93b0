//! Archive layout selection and multi-root storage (spec.md §4.10.1).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use catkeeper_fetch::{ArchivePackage, ZipArchive};
use catkeeper_types::PackageVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `{root}/{id}/{id}.{version}.nupkg`
    V2,
    /// `{root}/{id}/{version}/{id}.{version}.nupkg` plus sidecars.
    V3,
}

impl Layout {
    pub fn archive_path(&self, root: &Path, id: &str, version: &PackageVersion) -> PathBuf {
        let id = id.to_ascii_lowercase();
        let v = version.normalized();
        match self {
            Layout::V2 => root.join(&id).join(format!("{id}.{v}.nupkg")),
            Layout::V3 => root.join(&id).join(v).join(format!("{id}.{v}.nupkg")),
        }
    }
}

/// Pick the storage root for `(id, version)`: reuse whichever configured
/// root already holds a copy, otherwise the root with the most free disk
/// space (spec.md §4.10.1).
pub fn select_root(roots: &[PathBuf], id: &str, version: &PackageVersion, layout: Layout) -> PathBuf {
    for root in roots {
        if layout.archive_path(root, id, version).exists() {
            return root.clone();
        }
    }
    roots
        .iter()
        .max_by_key(|root| free_space_bytes(root))
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."))
}

fn free_space_bytes(root: &Path) -> u64 {
    use sysinfo::Disks;

    let disks = Disks::new_with_refreshed_list();
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    disks
        .iter()
        .filter(|d| root.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
        .unwrap_or(0)
}

/// Materialize the V3 sidecars — `{version}.nupkg.sha512` and
/// `{id}.nuspec` — from the cached archive (spec.md §4.10.1).
pub fn write_v3_sidecars(cache_path: &Path, dest_root: &Path, id: &str, version: &PackageVersion) -> Result<()> {
    let id = id.to_ascii_lowercase();
    let v = version.normalized();
    let dir = dest_root.join(&id).join(v);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create package directory {}", dir.display()))?;

    let archive = ZipArchive::open(cache_path.to_path_buf())
        .context("failed to open archive for sidecar materialization")?;

    let hash = archive.content_hash_base64()?;
    let hash_path = dir.join(format!("{v}.nupkg.sha512"));
    std::fs::write(&hash_path, hash)
        .with_context(|| format!("failed to write {}", hash_path.display()))?;

    let nuspec_path = dir.join(format!("{id}.nuspec"));
    archive
        .extract_manifest_to(&nuspec_path)
        .with_context(|| format!("failed to extract manifest to {}", nuspec_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_layout_has_no_version_directory() {
        let version = PackageVersion::parse("1.0.0").unwrap();
        let path = Layout::V2.archive_path(Path::new("/root"), "MyPkg", &version);
        assert_eq!(path, PathBuf::from("/root/mypkg/mypkg.1.0.0.0.nupkg"));
    }

    #[test]
    fn v3_layout_nests_under_a_version_directory() {
        let version = PackageVersion::parse("1.0.0").unwrap();
        let path = Layout::V3.archive_path(Path::new("/root"), "MyPkg", &version);
        assert_eq!(path, PathBuf::from("/root/mypkg/1.0.0.0/mypkg.1.0.0.0.nupkg"));
    }

    #[test]
    fn select_root_reuses_a_root_that_already_has_the_archive() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let version = PackageVersion::parse("1.0.0").unwrap();
        let existing = Layout::V2.archive_path(dir_b.path(), "a", &version);
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"x").unwrap();

        let roots = vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()];
        let selected = select_root(&roots, "a", &version, Layout::V2);
        assert_eq!(selected, dir_b.path());
    }

    #[test]
    fn select_root_falls_back_to_most_free_space_when_no_existing_copy() {
        let dir_a = tempfile::tempdir().unwrap();
        let roots = vec![dir_a.path().to_path_buf()];
        let version = PackageVersion::parse("1.0.0").unwrap();
        let selected = select_root(&roots, "a", &version, Layout::V2);
        assert_eq!(selected, dir_a.path());
    }
}
