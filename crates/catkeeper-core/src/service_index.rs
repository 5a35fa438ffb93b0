//! Service Index (spec.md §4.3, §6.2).
//!
//! Loads the repository root document exactly once per reader and exposes
//! typed service URIs by well-known `@type` strings, with ordered fallbacks
//! for versioned registration types.

use std::collections::HashMap;

use anyhow::{Context, Result};
use catkeeper_types::ConfigurationError;
use serde_json::Value;

const CATALOG_TYPES: &[&str] = &[
    "Catalog/3.0.0",
    "http://schema.emgarten.com/sleet#Catalog/1.0.0",
];

const REGISTRATION_BASE_TYPES: &[&str] = &[
    "RegistrationsBaseUrl/Versioned",
    "RegistrationsBaseUrl/3.6.0",
    "RegistrationsBaseUrl/3.4.0",
    "RegistrationsBaseUrl/3.0.0-beta",
];

const PACKAGE_BASE_ADDRESS_TYPES: &[&str] = &["PackageBaseAddress/3.0.0"];

const PACKAGE_INDEX_TYPES: &[&str] =
    &["http://schema.emgarten.com/sleet#SymbolsPackageIndex/1.0.0"];

/// Repository root document, indexed by `@type`.
pub struct ServiceIndex {
    by_type: HashMap<String, Vec<String>>,
}

impl ServiceIndex {
    /// Parse a root service-index document (spec.md §6.2). Refuses to
    /// proceed if it lacks a `resources` array — the reader requires a
    /// root service index, not a catalog leaf.
    pub fn parse(document: &Value) -> Result<Self> {
        let resources = document
            .get("resources")
            .and_then(Value::as_array)
            .context("service index document has no 'resources' array")?;

        let mut by_type: HashMap<String, Vec<String>> = HashMap::new();
        for resource in resources {
            let id = resource.get("@id").and_then(Value::as_str);
            let kind = resource.get("@type").and_then(Value::as_str);
            if let (Some(id), Some(kind)) = (id, kind) {
                by_type.entry(kind.to_string()).or_default().push(trim_trailing_slash(id));
            }
        }

        Ok(Self { by_type })
    }

    fn first_of(&self, accepted: &[&str]) -> Option<String> {
        for ty in accepted {
            if let Some(uris) = self.by_type.get(*ty)
                && let Some(first) = uris.first()
            {
                return Some(first.clone());
            }
        }
        None
    }

    /// Catalog root URI, preferring `Catalog/3.0.0` and falling back to the
    /// Sleet-compatible type string.
    pub fn catalog_uri(&self) -> Result<String, ConfigurationError> {
        self.first_of(CATALOG_TYPES).ok_or_else(|| ConfigurationError {
            accepted: CATALOG_TYPES.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Like [`Self::catalog_uri`] but reports absence as `Ok(None)`
    /// instead of an error, for the "does this feed have a catalog?"
    /// probe (spec.md §4.9).
    pub fn catalog_uri_opt(&self) -> Option<String> {
        self.first_of(CATALOG_TYPES)
    }

    pub fn package_base_address_uri(&self) -> Result<String, ConfigurationError> {
        self.first_of(PACKAGE_BASE_ADDRESS_TYPES)
            .ok_or_else(|| ConfigurationError {
                accepted: PACKAGE_BASE_ADDRESS_TYPES
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            })
    }

    pub fn registration_base_uri(&self) -> Result<String, ConfigurationError> {
        self.first_of(REGISTRATION_BASE_TYPES)
            .ok_or_else(|| ConfigurationError {
                accepted: REGISTRATION_BASE_TYPES
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            })
    }

    /// Optional; may be absent (spec.md §4.3).
    pub fn package_index_uri(&self) -> Option<String> {
        self.first_of(PACKAGE_INDEX_TYPES)
    }
}

fn trim_trailing_slash(uri: &str) -> String {
    uri.trim_end_matches('/').to_string()
}
