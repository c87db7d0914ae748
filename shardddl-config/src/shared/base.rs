use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Store requests need a positive deadline.
    #[error("`request_timeout_ms` cannot be zero")]
    RequestTimeoutZero,
    /// Watch channels must be able to hold at least one item.
    #[error("`watch_buffer_size` cannot be zero")]
    WatchBufferSizeZero,
    /// At least one attempt is required for every store request.
    #[error("`max_attempts` cannot be zero")]
    TxnRetryMaxAttemptsZero,
    /// Backoff delays must not shrink between attempts.
    #[error("`backoff_multiplier` must be >= 1.0, got {0}")]
    BackoffMultiplierTooSmall(f64),
    /// A source configuration is missing its identifier.
    #[error("`source_id` cannot be empty")]
    SourceIdEmpty,
}
