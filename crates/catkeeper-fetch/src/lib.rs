//! Fetch fabric for catkeeper (spec.md §4.1).
//!
//! Delivers parsed JSON documents, cached archive byte streams, and
//! validated manifest readers for a given URI. Response caching and cache
//! keys are deterministic and race-free; validation runs before a value is
//! considered cached.
//!
//! HTTP transport concerns (TLS, proxies, auth) are out of scope here by
//! design (spec.md §1) — this crate wraps a single blocking [`reqwest`]
//! client behind a cache and a retry policy.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use catkeeper_retry::{RetryPolicy, calculate_delay};
use catkeeper_types::{CancelToken, FetchError, Logger};
use serde_json::Value;

/// Default timeout for fetch-fabric requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Product-qualified user agent, applied only when the caller hasn't set one.
pub const DEFAULT_USER_AGENT: &str = concat!("catkeeper/", env!("CARGO_PKG_VERSION"));

/// Deterministic cache key for a URI: scheme and path separators become `_`
/// (spec.md §4.1, testable property §8 #8).
pub fn cache_key(uri: &str) -> String {
    uri.chars()
        .map(|c| match c {
            '/' | ':' | '?' | '&' | '=' | '.' => '_',
            other => other,
        })
        .collect()
}

/// Result of a successful archive fetch: a path to the cached bytes on
/// disk. Archive internals (extracting the manifest, hashing) are handled
/// by [`ArchivePackage`], a separate, swappable surface (spec.md §1).
pub struct ArchiveResponse {
    pub cache_path: PathBuf,
}

/// A manifest fetched and validated as well-formed XML (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct ManifestReader {
    pub xml: String,
}

impl ManifestReader {
    /// Read the text content of the first element named `tag` at any depth.
    /// Sufficient for the `id`/`version` fields the mirror needs; a full
    /// manifest object model is out of scope (spec.md §1).
    pub fn field(&self, tag: &str) -> Option<String> {
        use quick_xml::events::Event;
        use quick_xml::reader::Reader;

        let mut reader = Reader::from_str(&self.xml);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut in_tag = false;
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    in_tag = true;
                }
                Ok(Event::Text(t)) if in_tag => {
                    return t.unescape().ok().map(|c| c.into_owned());
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    in_tag = false;
                }
                Ok(Event::Eof) => return None,
                Err(_) => return None,
                _ => {}
            }
            buf.clear();
        }
    }
}

/// Pluggable archive-internals surface (spec.md §1: "the core requires only
/// an operation 'extract the named manifest entry to a path' and 'compute a
/// content hash of the archive'"). [`ZipArchive`] is the default, real
/// implementation; it is not part of the fetch fabric's own contract.
pub trait ArchivePackage {
    fn extract_manifest_to(&self, dest: &Path) -> anyhow::Result<()>;
    fn content_hash_base64(&self) -> anyhow::Result<String>;
}

/// ZIP-backed archive, opened from a path already fetched into the cache.
pub struct ZipArchive {
    path: PathBuf,
}

impl ZipArchive {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        // Validate eagerly: a corrupt archive must fail here, at fetch
        // time, not later when the mirror tries to extract from it.
        let file = fs::File::open(&path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        find_manifest_index(&mut archive)?;
        Ok(Self { path })
    }
}

impl ArchivePackage for ZipArchive {
    fn extract_manifest_to(&self, dest: &Path) -> anyhow::Result<()> {
        let file = fs::File::open(&self.path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let idx = find_manifest_index(&mut archive)?;
        let mut entry = archive.by_index(idx)?;
        let mut out = fs::File::create(dest)?;
        std::io::copy(&mut entry, &mut out)?;
        Ok(())
    }

    fn content_hash_base64(&self) -> anyhow::Result<String> {
        use base64::Engine as _;
        use sha2::{Digest, Sha512};

        let bytes = fs::read(&self.path)?;
        let digest = Sha512::digest(&bytes);
        Ok(base64::engine::general_purpose::STANDARD.encode(digest))
    }
}

fn find_manifest_index<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> anyhow::Result<usize> {
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.name().to_ascii_lowercase().ends_with(".nuspec") {
            return Ok(i);
        }
    }
    anyhow::bail!("archive contains no manifest (.nuspec) entry")
}

/// Fetch fabric: JSON/archive/manifest retrieval with response caching.
///
/// Safe to call from multiple threads: the JSON cache is a mutex-guarded
/// map and archives are cached by deterministic path, so concurrent
/// fetches of the same URI race harmlessly to the same cached value
/// (spec.md §5, "last-writer-wins on the parsed value is acceptable").
pub struct FetchFabric {
    client: reqwest::blocking::Client,
    json_cache: Mutex<HashMap<String, Value>>,
    cache_dir: PathBuf,
}

impl FetchFabric {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_user_agent(cache_dir, None)
    }

    /// `user_agent`: caller-supplied value, if any. The fabric only applies
    /// [`DEFAULT_USER_AGENT`] when this is `None` (spec.md §4.1).
    pub fn with_user_agent(cache_dir: impl Into<PathBuf>, user_agent: Option<&str>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).ok();
        Self {
            client,
            json_cache: Mutex::new(HashMap::new()),
            cache_dir,
        }
    }

    /// Best-effort recursive deletion of the archive cache directory
    /// (spec.md §4.10 step 7, "clear cache between batches to cap disk use").
    pub fn clear_cache(&self) {
        self.json_cache.lock().unwrap().clear();
        let _ = fs::remove_dir_all(&self.cache_dir);
        let _ = fs::create_dir_all(&self.cache_dir);
    }

    /// Retries `op` while it returns `TransportRetryable`, up to the
    /// fetch-level policy's attempt bound (spec.md §7: "~5 attempts").
    fn retry_fetch<T>(
        &self,
        cancel: &CancelToken,
        mut op: impl FnMut() -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let policy = RetryPolicy::Fetch.to_config();
        let mut attempt = 1;
        loop {
            cancel.check()?;
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    std::thread::sleep(calculate_delay(&policy, attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `fetchJSON(uri) -> JSONDocument` (spec.md §4.1). Timestamps are left
    /// as JSON strings; callers parse them with a single ISO-8601 format.
    pub fn fetch_json(
        &self,
        uri: &str,
        logger: &dyn Logger,
        cancel: &CancelToken,
    ) -> Result<Value, FetchError> {
        let key = cache_key(uri);
        if let Some(cached) = self.json_cache.lock().unwrap().get(&key).cloned() {
            logger.debug(&format!("json cache hit: {uri}"));
            return Ok(cached);
        }

        logger.verbose(&format!("fetching json: {uri}"));
        let value = self.retry_fetch(cancel, || self.fetch_json_once(uri))?;
        self.json_cache.lock().unwrap().insert(key, value.clone());
        Ok(value)
    }

    fn fetch_json_once(&self, uri: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(uri)
            .send()
            .map_err(|e| FetchError::TransportRetryable {
                uri: uri.to_string(),
                message: e.to_string(),
            })?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound {
                uri: uri.to_string(),
            }),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .map_err(|e| FetchError::TransportRetryable {
                        uri: uri.to_string(),
                        message: e.to_string(),
                    })?;
                let value: Value =
                    serde_json::from_slice(&bytes).map_err(|e| FetchError::ContentInvalid {
                        uri: uri.to_string(),
                        message: e.to_string(),
                    })?;
                if !value.is_object() {
                    return Err(FetchError::ContentInvalid {
                        uri: uri.to_string(),
                        message: "expected a JSON object".to_string(),
                    });
                }
                Ok(value)
            }
            status => Err(FetchError::TransportRetryable {
                uri: uri.to_string(),
                message: format!("unexpected status {status}"),
            }),
        }
    }

    /// `fetchArchive(uri) -> { cachePath }` (spec.md §4.1). Validates by
    /// opening the archive and locating its manifest entry.
    pub fn fetch_archive(
        &self,
        uri: &str,
        logger: &dyn Logger,
        cancel: &CancelToken,
    ) -> Result<ArchiveResponse, FetchError> {
        let path = self.cache_dir.join(cache_key(uri));
        logger.verbose(&format!("fetching archive: {uri}"));

        self.retry_fetch(cancel, || {
            self.download_to(uri, &path)?;
            ZipArchive::open(path.clone()).map_err(|e| FetchError::ContentInvalid {
                uri: uri.to_string(),
                message: e.to_string(),
            })?;
            Ok(())
        })?;

        Ok(ArchiveResponse { cache_path: path })
    }

    /// `fetchManifest(uri) -> ManifestReader` (spec.md §4.1). Validates by
    /// streaming-XML-parsing the body before returning.
    pub fn fetch_manifest(
        &self,
        uri: &str,
        logger: &dyn Logger,
        cancel: &CancelToken,
    ) -> Result<ManifestReader, FetchError> {
        logger.verbose(&format!("fetching manifest: {uri}"));
        self.retry_fetch(cancel, || {
            let response =
                self.client
                    .get(uri)
                    .send()
                    .map_err(|e| FetchError::TransportRetryable {
                        uri: uri.to_string(),
                        message: e.to_string(),
                    })?;
            match response.status() {
                reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound {
                    uri: uri.to_string(),
                }),
                status if status.is_success() => {
                    let xml = response.text().map_err(|e| FetchError::TransportRetryable {
                        uri: uri.to_string(),
                        message: e.to_string(),
                    })?;
                    validate_xml(&xml).map_err(|msg| FetchError::ContentInvalid {
                        uri: uri.to_string(),
                        message: msg,
                    })?;
                    Ok(ManifestReader { xml })
                }
                status => Err(FetchError::TransportRetryable {
                    uri: uri.to_string(),
                    message: format!("unexpected status {status}"),
                }),
            }
        })
    }

    fn download_to(&self, uri: &str, dest: &Path) -> Result<(), FetchError> {
        let mut response =
            self.client
                .get(uri)
                .send()
                .map_err(|e| FetchError::TransportRetryable {
                    uri: uri.to_string(),
                    message: e.to_string(),
                })?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound {
                uri: uri.to_string(),
            }),
            status if status.is_success() => {
                let tmp = dest.with_extension("part");
                {
                    let mut out =
                        fs::File::create(&tmp).map_err(|e| FetchError::TransportRetryable {
                            uri: uri.to_string(),
                            message: e.to_string(),
                        })?;
                    std::io::copy(&mut response, &mut out).map_err(|e| {
                        FetchError::TransportRetryable {
                            uri: uri.to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    out.flush().ok();
                }
                fs::rename(&tmp, dest).map_err(|e| FetchError::TransportRetryable {
                    uri: uri.to_string(),
                    message: e.to_string(),
                })?;
                Ok(())
            }
            status => Err(FetchError::TransportRetryable {
                uri: uri.to_string(),
                message: format!("unexpected status {status}"),
            }),
        }
    }
}

fn validate_xml(xml: &str) -> Result<(), String> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}
