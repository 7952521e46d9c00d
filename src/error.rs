//! Error types for the Ratewarden crate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum RatewardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for RatewardenError {
    fn from(err: config::ConfigError) -> Self {
        RatewardenError::Config(err.to_string())
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RatewardenError>;

/// Returned by [`RateLimiter::check`](crate::ratelimit::RateLimiter::check) when an
/// identifier has used up its quota for the current window.
///
/// This is expected control flow, not a failure of the limiter. The bucket is
/// left untouched, so `count` is what the identifier had already consumed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limit exceeded for {identifier}: {count}/{limit} requests, resets at {reset_at}")]
pub struct RateLimitExceeded {
    /// The identifier that was rejected
    pub identifier: String,
    /// Requests admitted in the current window
    pub count: u64,
    /// Configured quota per window
    pub limit: u64,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
    /// Time left until `reset_at`, measured when the request was rejected
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Whole seconds a client should wait before retrying, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let secs = if self.retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
        secs.max(1)
    }
}
