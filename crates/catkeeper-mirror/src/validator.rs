//! Reachability Validator (spec.md §4.11): confirm every flattened
//! entry's archive URI is still reachable, without downloading it.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use catkeeper_core::{InternPool, ServiceIndex};
use catkeeper_types::{CancelToken, Logger};
use chrono::{DateTime, Utc};

const HEAD_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub id: String,
    pub version: String,
    pub uri: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub checked: usize,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    /// Exit-code semantics: success iff no failures were collected
    /// (spec.md §4.11).
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Per-id errors, sorted case-insensitively by id then version.
    pub fn sorted_failures(&self) -> Vec<&ValidationFailure> {
        let mut failures: Vec<&ValidationFailure> = self.failures.iter().collect();
        failures.sort_by(|a, b| {
            a.id.to_ascii_lowercase()
                .cmp(&b.id.to_ascii_lowercase())
                .then_with(|| a.version.cmp(&b.version))
        });
        failures
    }
}

#[allow(clippy::too_many_arguments)]
pub fn validate(
    fabric: &catkeeper_fetch::FetchFabric,
    service_index: &ServiceIndex,
    pool: &InternPool,
    logger: &dyn Logger,
    cancel: &CancelToken,
    package_base_uri: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_threads: usize,
) -> Result<ValidationReport> {
    let entries = catkeeper_core::traverse_window(fabric, service_index, pool, logger, cancel, start, end, max_threads)?;
    logger.info(&format!("validator: checking {} entries", entries.len()));

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(HEAD_TIMEOUT_SECS))
        .build()?;

    let mut report = ValidationReport { checked: entries.len(), failures: Vec::new() };

    for chunk in entries.chunks(max_threads.max(1)) {
        cancel.check()?;
        let mut handles = Vec::with_capacity(chunk.len());
        for entry in chunk {
            let uri = catkeeper_core::uri::archive_uri(package_base_uri, &entry.id, &entry.version);
            let id = entry.id.clone();
            let version = entry.version.normalized().to_string();
            let client = client.clone();
            handles.push(thread::spawn(move || check_reachable(&client, &uri).map_err(|message| {
                ValidationFailure { id, version, uri, message }
            })));
        }
        for handle in handles {
            if let Err(failure) = handle.join().expect("validation task thread panicked") {
                report.failures.push(failure);
            }
        }
    }

    Ok(report)
}

fn check_reachable(client: &reqwest::blocking::Client, uri: &str) -> Result<(), String> {
    let response = client.head(uri).send().map_err(|e| e.to_string())?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("unexpected status {}", response.status()))
    }
}
