//! CLI-flag + environment-variable configuration merge for catkeeper.
//!
//! A CLI flag always wins when present; otherwise the matching environment
//! variable is consulted; otherwise the caller's default applies. This
//! mirrors the precedence the teacher's CLI uses for its own duration
//! flags, generalized here to any `FromStr` value.

use std::str::FromStr;

use anyhow::{Context, Result};

pub const MAX_THREADS_ENV: &str = "CATKEEPER_MAX_THREADS";
pub const DELAY_MINUTES_ENV: &str = "CATKEEPER_DELAY_MINUTES";

/// Resolve a value from (in order) an explicit CLI flag, an environment
/// variable, then a default.
pub fn resolve<T: FromStr>(cli_value: Option<T>, env_var: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    if let Some(v) = cli_value {
        return Ok(v);
    }
    match std::env::var(env_var) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {env_var} ('{raw}'): {e}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e).with_context(|| format!("failed to read {env_var}")),
    }
}

/// Parse a human-readable duration string (e.g. `"10m"`, `"500ms"`), the
/// same flag format the teacher's CLI uses for its backoff settings.
pub fn parse_duration(s: &str) -> Result<std::time::Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}
