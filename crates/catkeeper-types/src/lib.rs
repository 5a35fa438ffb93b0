//! Core domain types shared across the catkeeper workspace.
//!
//! This crate defines the catalog's wire-level entities ([`CatalogEntry`],
//! [`EntryKind`]), the NuGet-style four-component [`PackageVersion`] with
//! release-label ordering, and the closed error taxonomy ([`FetchError`],
//! [`ConfigurationError`]) that the fetch fabric and service index raise.
//!
//! None of these types own an HTTP client or a cache; they are plain,
//! serializable data so that `catkeeper-fetch` and `catkeeper-core` can be
//! tested without network access.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Leveled logger consumed by the core (spec.md §6.1). Console/file sinks
/// are out of scope for the core; the CLI crate supplies the concrete
/// implementation.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
    fn verbose(&self, message: &str) {
        self.log(LogLevel::Verbose, message);
    }
    fn info(&self, message: &str) {
        self.log(LogLevel::Information, message);
    }
    fn minimal(&self, message: &str) {
        self.log(LogLevel::Minimal, message);
    }
    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Verbose,
    Information,
    Minimal,
    Warning,
    Error,
}

/// A logger that discards everything; useful in tests and as a default.
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Cooperative cancellation token threaded through every fetch and file I/O
/// call (spec.md §5). Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(AtomicOrdering::SeqCst)
    }

    /// Returns `Err(FetchError::Canceled)` if cancellation has been requested.
    pub fn check(&self) -> Result<(), FetchError> {
        if self.is_canceled() {
            Err(FetchError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Errors raised by the fetch fabric (spec §4.1, §7).
///
/// `NotFound` is distinguished from other transport failures because the
/// mirror driver downgrades it to a warning while the validator records it
/// as a failure; `TransportRetryable` is retried at the fetch layer before
/// bubbling up; `ContentInvalid` is never retried, it means the document
/// was fetched but failed to parse as the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("not found: {uri}")]
    NotFound { uri: String },

    #[error("transport error fetching {uri}: {message}")]
    TransportRetryable { uri: String, message: String },

    #[error("invalid content at {uri}: {message}")]
    ContentInvalid { uri: String, message: String },

    #[error("operation canceled")]
    Canceled,
}

impl FetchError {
    /// True for errors the fetch-level retry loop should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::TransportRetryable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

/// Raised by the service index when a required service type is absent.
#[derive(Debug, thiserror::Error)]
#[error("service index is missing a required service; accepted types: {accepted:?}")]
pub struct ConfigurationError {
    pub accepted: Vec<String>,
}

/// A single release label component, e.g. `rc`, `1`, `2`.
///
/// NuGet orders release labels by comparing each dot-separated component:
/// numeric components compare numerically, everything else compares as
/// ASCII case-insensitive text, and numeric components sort below
/// alphabetic ones at the same position.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReleaseLabel {
    Numeric(u64),
    Text(String),
}

impl ReleaseLabel {
    fn parse(s: &str) -> Self {
        match s.parse::<u64>() {
            Ok(n) => ReleaseLabel::Numeric(n),
            Err(_) => ReleaseLabel::Text(s.to_ascii_lowercase()),
        }
    }
}

impl Ord for ReleaseLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ReleaseLabel::Numeric(a), ReleaseLabel::Numeric(b)) => a.cmp(b),
            (ReleaseLabel::Text(a), ReleaseLabel::Text(b)) => a.cmp(b),
            (ReleaseLabel::Numeric(_), ReleaseLabel::Text(_)) => Ordering::Less,
            (ReleaseLabel::Text(_), ReleaseLabel::Numeric(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for ReleaseLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A NuGet-style `major.minor.patch[.revision][-release]+[metadata]` version.
///
/// Comparison follows the data model in spec.md §3: numeric components
/// first, then release labels (a version with no release label is greater
/// than any prerelease of the same numeric triplet), and build metadata is
/// never part of ordering. [`PackageVersion::normalized`] is the lowercase,
/// metadata-stripped display form used in archive paths and request URIs.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    release: Vec<ReleaseLabel>,
    metadata: Option<String>,
    normalized: String,
}

impl PackageVersion {
    /// Parse a version string. Accepts 2-4 numeric components, an optional
    /// `-release.labels`, and an optional `+metadata` suffix.
    pub fn parse(input: &str) -> Result<Self, String> {
        let (core_and_release, metadata) = match input.split_once('+') {
            Some((a, b)) => (a, Some(b.to_string())),
            None => (input, None),
        };
        let (core, release_str) = match core_and_release.split_once('-') {
            Some((a, b)) => (a, Some(b)),
            None => (core_and_release, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(format!("invalid version '{input}': expected 2-4 numeric components"));
        }
        let mut nums = [0u64; 4];
        for (i, p) in parts.iter().enumerate() {
            nums[i] = p
                .parse::<u64>()
                .map_err(|_| format!("invalid version '{input}': non-numeric component '{p}'"))?;
        }

        let release: Vec<ReleaseLabel> = release_str
            .map(|s| s.split('.').map(ReleaseLabel::parse).collect())
            .unwrap_or_default();

        let mut normalized = format!("{}.{}.{}.{}", nums[0], nums[1], nums[2], nums[3]);
        if let Some(release_str) = release_str {
            normalized.push('-');
            normalized.push_str(&release_str.to_ascii_lowercase());
        }

        Ok(Self {
            major: nums[0],
            minor: nums[1],
            patch: nums[2],
            revision: nums[3],
            release,
            metadata,
            normalized,
        })
    }

    /// Lowercase, metadata-stripped display form (spec.md §3 "Normalization").
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    pub fn is_prerelease(&self) -> bool {
        !self.release.is_empty()
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.revision)
            .cmp(&(other.major, other.minor, other.patch, other.revision))
            .then_with(|| match (self.is_prerelease(), other.is_prerelease()) {
                (false, false) => Ordering::Equal,
                (false, true) => Ordering::Greater,
                (true, false) => Ordering::Less,
                (true, true) => self.release.cmp(&other.release),
            })
    }
}

/// Tagged variant for catalog events (design note §9: the source models
/// this with a set of declared `@type` strings; here it is an explicit enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    AddOrUpdate,
    Delete,
}

/// `(lowercased id, normalized version)` — the identity spec.md §3 mandates
/// for equality, hashing, and flatten-collapsing. Commit id/timestamp are
/// deliberately excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryIdentity {
    id_lower: String,
    version_normalized: String,
}

impl EntryIdentity {
    pub fn new(id: &str, version: &PackageVersion) -> Self {
        Self {
            id_lower: id.to_ascii_lowercase(),
            version_normalized: version.normalized().to_string(),
        }
    }

    pub fn id_lower(&self) -> &str {
        &self.id_lower
    }

    pub fn version_normalized(&self) -> &str {
        &self.version_normalized
    }
}

/// One event materialized from a catalog page (spec.md §4.6, §6.3).
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub uri: String,
    pub kind: EntryKind,
    pub commit_id: String,
    pub commit_timestamp: DateTime<Utc>,
    pub id: String,
    pub version: PackageVersion,
}

impl CatalogEntry {
    pub fn identity(&self) -> EntryIdentity {
        EntryIdentity::new(&self.id, &self.version)
    }

    pub fn is_add_or_update(&self) -> bool {
        self.kind == EntryKind::AddOrUpdate
    }

    pub fn is_delete(&self) -> bool {
        self.kind == EntryKind::Delete
    }
}
