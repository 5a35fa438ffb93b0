//! Reference Intern Pool (spec.md §4.2).
//!
//! Bounds memory across thousands of catalog entries by deduplicating the
//! strings, timestamps, and versions they share. One pool per reader
//! session; thread-safe, first-writer-wins on concurrent inserts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use catkeeper_types::PackageVersion;
use chrono::{DateTime, Utc};

#[derive(Default)]
pub struct InternPool {
    strings: Mutex<HashMap<String, Arc<str>>>,
    timestamps: Mutex<HashMap<String, DateTime<Utc>>>,
    versions: Mutex<HashMap<String, Arc<PackageVersion>>>,
}

impl InternPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string segment, e.g. a path component of a catalog `@id`.
    pub fn intern_str(&self, value: &str) -> Arc<str> {
        let mut map = self.strings.lock().unwrap();
        if let Some(existing) = map.get(value) {
            return existing.clone();
        }
        let arc: Arc<str> = Arc::from(value);
        map.insert(value.to_string(), arc.clone());
        arc
    }

    /// Intern a `commitTimeStamp` string, parsed once with a single
    /// ISO-8601 format (spec.md §6.3: "JSON parsing must disable automatic
    /// date conversion; timestamps are strings parsed explicitly").
    pub fn intern_timestamp(&self, raw: &str) -> Result<DateTime<Utc>, String> {
        let mut map = self.timestamps.lock().unwrap();
        if let Some(existing) = map.get(raw) {
            return Ok(*existing);
        }
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| format!("invalid commitTimeStamp '{raw}': {e}"))?
            .with_timezone(&Utc);
        map.insert(raw.to_string(), parsed);
        Ok(parsed)
    }

    /// Intern a `nuget:version` string.
    pub fn intern_version(&self, raw: &str) -> Result<Arc<PackageVersion>, String> {
        let mut map = self.versions.lock().unwrap();
        if let Some(existing) = map.get(raw) {
            return Ok(existing.clone());
        }
        let version = Arc::new(PackageVersion::parse(raw)?);
        map.insert(raw.to_string(), version.clone());
        Ok(version)
    }
}
