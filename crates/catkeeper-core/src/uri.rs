//! URI Builder (spec.md §4.4) — pure functions computing canonical URIs
//! for a package's archive, manifest, and registration documents.

use catkeeper_types::PackageVersion;

fn trim(base: &str) -> &str {
    base.trim_end_matches('/')
}

/// `{packageBase}/{id}/{version}/{id}.{version}.nupkg`
pub fn archive_uri(package_base: &str, id: &str, version: &PackageVersion) -> String {
    let id = id.to_ascii_lowercase();
    let v = version.normalized();
    format!("{}/{id}/{v}/{id}.{v}.nupkg", trim(package_base))
}

/// `{packageBase}/{id}/{version}/{id}.nuspec`
pub fn manifest_uri(package_base: &str, id: &str, version: &PackageVersion) -> String {
    let id = id.to_ascii_lowercase();
    let v = version.normalized();
    format!("{}/{id}/{v}/{id}.nuspec", trim(package_base))
}

/// `{packageBase}/{id}/index.json`
pub fn package_base_index_uri(package_base: &str, id: &str) -> String {
    let id = id.to_ascii_lowercase();
    format!("{}/{id}/index.json", trim(package_base))
}

/// `{registrationBase}/{id}/{version}.json`
pub fn registration_leaf_uri(registration_base: &str, id: &str, version: &PackageVersion) -> String {
    let id = id.to_ascii_lowercase();
    let v = version.normalized();
    format!("{}/{id}/{v}.json", trim(registration_base))
}

/// `{registrationBase}/{id}/index.json`
pub fn registration_index_uri(registration_base: &str, id: &str) -> String {
    let id = id.to_ascii_lowercase();
    format!("{}/{id}/index.json", trim(registration_base))
}
