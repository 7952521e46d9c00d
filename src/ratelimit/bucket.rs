//! Per-identifier counting record.

use std::time::Duration;

/// Requests admitted for one identifier within the current window.
///
/// A bucket whose `reset_at_ms` has passed is stale and must be treated as
/// freshly created before it takes part in any decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Requests admitted in the current window
    count: u64,
    /// End of the current window, in epoch milliseconds
    reset_at_ms: u64,
}

impl Bucket {
    /// Create an empty bucket whose window starts at `now_ms`.
    pub fn fresh(now_ms: u64, interval: Duration) -> Self {
        Self {
            count: 0,
            reset_at_ms: now_ms.saturating_add(interval.as_millis() as u64),
        }
    }

    /// Whether the window has ended.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }

    /// Start a new window in place if the current one has ended.
    ///
    /// Returns `true` if the bucket was reset.
    pub fn refresh_if_expired(&mut self, now_ms: u64, interval: Duration) -> bool {
        if self.is_expired(now_ms) {
            *self = Self::fresh(now_ms, interval);
            true
        } else {
            false
        }
    }

    /// Consume one request if the quota allows it.
    ///
    /// Leaves the bucket untouched and returns `false` when `count >= limit`.
    pub fn try_admit(&mut self, limit: u64) -> bool {
        if self.count >= limit {
            return false;
        }
        self.count += 1;
        true
    }

    /// Quota left in the current window.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.count)
    }

    /// Requests admitted in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// End of the current window, in epoch milliseconds.
    pub fn reset_at_ms(&self) -> u64 {
        self.reset_at_ms
    }
}
