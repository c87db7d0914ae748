use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::ValidationError;

/// Settings shared by every process talking to the coordination store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoordinationConfig {
    /// Root prefix under which every coordination key lives.
    ///
    /// Default: `/dm-master`
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deadline applied to every single store request.
    ///
    /// Default: 10000ms
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retry behaviour for store requests and compare-and-swap loops.
    #[serde(default)]
    pub txn_retry: TxnRetryConfig,

    /// Capacity of the result and error channels handed to watchers.
    ///
    /// A full result channel applies backpressure to the watch rather than dropping events.
    /// Default: 64
    #[serde(default = "default_watch_buffer_size")]
    pub watch_buffer_size: usize,

    /// Number of historical events the in-memory store keeps before compacting.
    ///
    /// Watches that start below the compacted revision fail with a compaction error.
    /// `0` keeps the whole history. Default: 10000
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

impl Config for CoordinationConfig {
    const NAME: &'static str = "coordination configuration";

    fn validate(&self) -> Result<(), ValidationError> {
        CoordinationConfig::validate(self)
    }
}

fn default_key_prefix() -> String {
    "/dm-master".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_watch_buffer_size() -> usize {
    64
}

fn default_history_retention() -> usize {
    10_000
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            request_timeout_ms: default_request_timeout_ms(),
            txn_retry: TxnRetryConfig::default(),
            watch_buffer_size: default_watch_buffer_size(),
            history_retention: default_history_retention(),
        }
    }
}

impl CoordinationConfig {
    /// Returns the per-request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.request_timeout_ms == 0 {
            return Err(ValidationError::RequestTimeoutZero);
        }

        if self.watch_buffer_size == 0 {
            return Err(ValidationError::WatchBufferSizeZero);
        }

        self.txn_retry.validate()
    }
}

/// Exponential backoff settings for retrying store requests.
///
/// `max_attempts` also bounds how many times a compare-and-swap write re-evaluates
/// the stored value after losing a race to a concurrent writer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TxnRetryConfig {
    /// Total attempts including the first one.
    ///
    /// Default: 10
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    ///
    /// Default: 50ms
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Upper bound for a single backoff delay.
    ///
    /// Default: 2000ms
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt. Must be >= 1.0.
    ///
    /// Default: 2.0
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_retry_delay_ms() -> u64 {
    50
}

fn default_max_retry_delay_ms() -> u64 {
    2_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for TxnRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl TxnRetryConfig {
    /// Returns the initial retry delay as a [`Duration`].
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    /// Returns the maximum retry delay as a [`Duration`].
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Validates the retry settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::TxnRetryMaxAttemptsZero);
        }

        if self.backoff_multiplier < 1.0 {
            return Err(ValidationError::BackoffMultiplierTooSmall(
                self.backoff_multiplier,
            ));
        }

        Ok(())
    }
}
