//! Core rate limiter implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::bucket::Bucket;
use super::clock::{to_datetime, Clock, SystemClock};
use crate::error::{RateLimitExceeded, RatewardenError, Result};

/// Entries inspected when choosing an eviction victim at capacity.
const EVICTION_SAMPLE: usize = 32;
/// Sample rounds a new identifier spends freeing a slot.
const EVICTION_ROUNDS: usize = 4;

/// Configuration for a single rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Window length in milliseconds
    pub interval_ms: u64,
    /// Maximum admitted requests per identifier per window
    #[serde(alias = "limit")]
    pub unique_token_per_interval: u64,
}

impl LimiterConfig {
    /// Create a configuration admitting `limit` requests per `interval`.
    pub fn new(interval: Duration, limit: u64) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            unique_token_per_interval: limit,
        }
    }

    /// Reject non-positive intervals and quotas.
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(RatewardenError::Config(
                "interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.unique_token_per_interval == 0 {
            return Err(RatewardenError::Config(
                "unique_token_per_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounds on the in-memory bucket store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Hard cap on tracked identifiers
    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,

    /// Sweep expired buckets on every Nth check
    #[serde(default = "default_sweep_every")]
    pub sweep_every: u64,

    /// Background sweeper period in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_buckets: default_max_buckets(),
            sweep_every: default_sweep_every(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_max_buckets() -> usize {
    10_000
}

fn default_sweep_every() -> u64 {
    1_000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

impl StoreConfig {
    /// Reject zero bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_buckets == 0 {
            return Err(RatewardenError::Config(
                "max_buckets must be greater than zero".to_string(),
            ));
        }
        if self.sweep_every == 0 {
            return Err(RatewardenError::Config(
                "sweep_every must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(RatewardenError::Config(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Quota view for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Configured quota per window
    pub limit: u64,
    /// Requests still allowed in the current window
    pub remaining: u64,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
}

/// In-memory fixed-window rate limiter keyed by client identifier.
///
/// Buckets live in a [`DashMap`], so checks for different identifiers only
/// contend when they hash to the same shard. The entry guard is held across
/// refresh, compare and increment, which makes [`check`](Self::check) atomic
/// per identifier.
///
/// The store is bounded by [`StoreConfig`]: expired buckets are swept every
/// `sweep_every` checks and by the optional background sweeper. When a new
/// identifier arrives at `max_buckets`, a small sample of the store is
/// inspected and its expired buckets, or else its bucket closest to expiry,
/// are evicted. No store-wide lock is taken, so concurrent inserts at capacity
/// may overshoot `max_buckets` by up to the number of racing callers.
pub struct RateLimiter {
    /// Buckets indexed by identifier
    buckets: DashMap<String, Bucket>,
    limit: u64,
    interval: Duration,
    store: StoreConfig,
    clock: Arc<dyn Clock>,
    /// Checks performed, drives the opportunistic sweep
    checks: AtomicU64,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock with default store bounds.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, StoreConfig::default(), Arc::new(SystemClock))
    }

    /// Create a rate limiter with explicit store bounds and time source.
    pub fn with_clock(
        config: LimiterConfig,
        store: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        store.validate()?;

        Ok(Self {
            buckets: DashMap::new(),
            limit: config.unique_token_per_interval,
            interval: Duration::from_millis(config.interval_ms),
            store,
            clock,
            checks: AtomicU64::new(0),
        })
    }

    /// Admit one request for `identifier` or reject it.
    ///
    /// On success the returned status reflects the request just admitted. On
    /// rejection nothing is mutated.
    pub fn check(
        &self,
        identifier: &str,
    ) -> std::result::Result<RateLimitStatus, RateLimitExceeded> {
        let now = self.clock.now_ms();

        trace!(key = %identifier, "Checking rate limit");

        self.maybe_sweep(now);

        let (admitted, count, reset_at_ms) = match self.buckets.get_mut(identifier) {
            Some(mut bucket) => self.admit(&mut bucket, now),
            None => {
                self.make_room(now);
                let mut bucket = self
                    .buckets
                    .entry(identifier.to_string())
                    .or_insert_with(|| {
                        debug!(
                            key = %identifier,
                            limit = self.limit,
                            interval_ms = self.interval.as_millis() as u64,
                            "Creating new rate limit bucket"
                        );
                        Bucket::fresh(now, self.interval)
                    });
                self.admit(&mut bucket, now)
            }
        };

        let reset_at = to_datetime(reset_at_ms);

        if admitted {
            return Ok(RateLimitStatus {
                limit: self.limit,
                remaining: self.limit.saturating_sub(count),
                reset_at,
            });
        }

        debug!(key = %identifier, count = count, limit = self.limit, "Rate limit exceeded");

        Err(RateLimitExceeded {
            identifier: identifier.to_string(),
            count,
            limit: self.limit,
            reset_at,
            retry_after: Duration::from_millis(reset_at_ms.saturating_sub(now)),
        })
    }

    /// Report the quota for `identifier` without consuming any of it.
    ///
    /// An expired window is reported as if it had been reset; the stored bucket
    /// is left for the next [`check`](Self::check) to refresh.
    pub fn status(&self, identifier: &str) -> RateLimitStatus {
        let now = self.clock.now_ms();

        match self.buckets.get(identifier) {
            Some(bucket) if !bucket.is_expired(now) => RateLimitStatus {
                limit: self.limit,
                remaining: bucket.remaining(self.limit),
                reset_at: to_datetime(bucket.reset_at_ms()),
            },
            _ => self.fresh_status(now),
        }
    }

    /// Forget `identifier` entirely. Unknown identifiers are ignored.
    pub fn reset(&self, identifier: &str) {
        if self.buckets.remove(identifier).is_some() {
            debug!(key = %identifier, "Rate limit bucket reset");
        }
    }

    /// Drop every bucket whose window has ended. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_at(self.clock.now_ms())
    }

    /// Number of identifiers currently held in memory.
    pub fn tracked_identifiers(&self) -> usize {
        self.buckets.len()
    }

    /// Configured quota per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Configured window length.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start a background task that sweeps expired buckets every
    /// `sweep_interval_ms`.
    ///
    /// The task holds a weak reference and exits once the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_millis(self.store.sweep_interval_ms);
        let limiter = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.sweep_expired();
            }

            trace!("Rate limit sweeper stopped");
        })
    }

    fn admit(&self, bucket: &mut Bucket, now: u64) -> (bool, u64, u64) {
        bucket.refresh_if_expired(now, self.interval);
        let admitted = bucket.try_admit(self.limit);
        (admitted, bucket.count(), bucket.reset_at_ms())
    }

    fn fresh_status(&self, now: u64) -> RateLimitStatus {
        RateLimitStatus {
            limit: self.limit,
            remaining: self.limit,
            reset_at: to_datetime(Bucket::fresh(now, self.interval).reset_at_ms()),
        }
    }

    fn maybe_sweep(&self, now: u64) {
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % self.store.sweep_every == 0 {
            self.sweep_at(now);
        }
    }

    fn sweep_at(&self, now: u64) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let keep = !bucket.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(removed = removed, remaining = self.buckets.len(), "Swept expired buckets");
        }
        removed
    }

    /// Free a slot for a new identifier once the store holds `max_buckets`.
    ///
    /// Victims come from the first [`EVICTION_SAMPLE`] entries the map yields:
    /// expired buckets first, otherwise the one closest to expiry. Rounds repeat
    /// until the store is below the cap, so overshoot left by racing inserts is
    /// paid back by later ones. Each round costs O(sample), independent of the
    /// store size.
    ///
    /// Must not be called while holding a guard into `buckets`.
    fn make_room(&self, now: u64) {
        for _ in 0..EVICTION_ROUNDS {
            if self.buckets.len() < self.store.max_buckets {
                return;
            }

            let sample: Vec<(String, u64)> = self
                .buckets
                .iter()
                .take(EVICTION_SAMPLE)
                .map(|entry| (entry.key().clone(), entry.value().reset_at_ms()))
                .collect();

            let mut reclaimed = 0;
            for (key, _) in sample.iter().filter(|(_, reset_at_ms)| now >= *reset_at_ms) {
                if self
                    .buckets
                    .remove_if(key, |_, bucket| bucket.is_expired(now))
                    .is_some()
                {
                    reclaimed += 1;
                }
            }
            if reclaimed > 0 {
                debug!(reclaimed = reclaimed, "Reclaimed expired buckets at capacity");
                continue;
            }

            let Some((key, reset_at_ms)) = sample
                .into_iter()
                .min_by_key(|(_, reset_at_ms)| *reset_at_ms)
            else {
                return;
            };

            // Skip the victim if it was refreshed since it was sampled.
            if self
                .buckets
                .remove_if(&key, |_, bucket| bucket.reset_at_ms() == reset_at_ms)
                .is_some()
            {
                warn!(
                    key = %key,
                    max_buckets = self.store.max_buckets,
                    "Bucket store full, evicted bucket closest to expiry"
                );
            }
        }
    }
}
