//! Retry strategies and backoff policies for catkeeper.
//!
//! Two layers of retry are configured from this crate (spec.md §7):
//! - **fetch-level**: the fetch fabric retries `TransportRetryable` errors
//!   up to [`RetryPolicy::fetch_default`]'s 5 attempts before bubbling up.
//! - **task-level**: the mirror driver retries a failed download task up to
//!   [`RetryPolicy::mirror_task_default`]'s 10 attempts with linear backoff
//!   (`5s * (attempt + 1)`, spec.md §9).
//!
//! # Example
//!
//! ```
//! use catkeeper_retry::{RetryPolicy, calculate_delay};
//!
//! let config = RetryPolicy::MirrorTask.to_config();
//! let delay = calculate_delay(&config, 2);
//! println!("retry after: {:?}", delay);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately.
    Immediate,
    /// Exponential backoff: delay doubles each attempt.
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt.
    Linear,
    /// Constant delay: same delay every attempt.
    Constant,
}

/// Predefined retry policies for the two layers catkeeper retries at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Fetch-fabric retries for `TransportRetryable` errors (spec.md §7): up
    /// to 5 attempts, exponential backoff.
    #[default]
    Fetch,
    /// Mirror-driver per-task retries (spec.md §4.10.2, §9): up to 10
    /// attempts, linear backoff of `5s * (attempt + 1)`.
    MirrorTask,
    /// Fully custom configuration.
    Custom,
}

impl RetryPolicy {
    /// Get the default retry configuration for this policy.
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Fetch => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 5,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::MirrorTask => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 10,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(120),
                jitter: 0.0,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Maximum number of retry attempts.
    #[serde(default)]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(with = "humantime_serde")]
    #[serde(default)]
    pub base_delay: Duration,
    /// Maximum delay cap for backoff.
    #[serde(with = "humantime_serde")]
    #[serde(default)]
    pub max_delay: Duration,
    /// Jitter factor for randomized delays (0.0 = no jitter, 1.0 = full jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
        }
    }
}

fn default_jitter() -> f64 {
    0.5
}

/// Calculate the delay for the next retry attempt based on the strategy
/// configuration. `attempt` is 1-based.
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let jittered = if config.jitter > 0.0 { apply_jitter(delay, config.jitter) } else { delay };

    jittered.min(config.max_delay)
}

/// Apply jitter to a delay value. Jitter factor of 0.5 means `delay * (0.5..1.5)`.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter_range = 2.0 * jitter;
    let random_factor = 1.0 - jitter + (rand::random::<f64>() * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}
