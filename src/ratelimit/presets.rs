//! Named limiter configurations and the registry built from them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use super::clock::{Clock, SystemClock};
use super::limiter::{LimiterConfig, RateLimiter, StoreConfig};
use crate::error::Result;

const PRESET_INTERVAL: Duration = Duration::from_secs(60);

/// Quotas for the three named limiters.
///
/// Each preset may be given partially; missing fields keep that preset's
/// default, so `chat: { limit: 5 }` still uses a 60 second window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PresetOverrides")]
pub struct PresetsConfig {
    /// General API endpoints
    pub api: LimiterConfig,

    /// Chat endpoints
    pub chat: LimiterConfig,

    /// Sensitive endpoints
    pub strict: LimiterConfig,
}

/// Preset fields as they appear in configuration sources.
#[derive(Debug, Default, Deserialize)]
struct PresetOverrides {
    #[serde(default)]
    api: LimiterOverride,
    #[serde(default)]
    chat: LimiterOverride,
    #[serde(default)]
    strict: LimiterOverride,
}

#[derive(Debug, Default, Deserialize)]
struct LimiterOverride {
    interval_ms: Option<u64>,
    #[serde(alias = "unique_token_per_interval")]
    limit: Option<u64>,
}

impl LimiterOverride {
    fn merge_into(self, base: LimiterConfig) -> LimiterConfig {
        LimiterConfig {
            interval_ms: self.interval_ms.unwrap_or(base.interval_ms),
            unique_token_per_interval: self.limit.unwrap_or(base.unique_token_per_interval),
        }
    }
}

impl From<PresetOverrides> for PresetsConfig {
    fn from(overrides: PresetOverrides) -> Self {
        Self {
            api: overrides.api.merge_into(default_api()),
            chat: overrides.chat.merge_into(default_chat()),
            strict: overrides.strict.merge_into(default_strict()),
        }
    }
}

impl Default for PresetsConfig {
    fn default() -> Self {
        Self {
            api: default_api(),
            chat: default_chat(),
            strict: default_strict(),
        }
    }
}

fn default_api() -> LimiterConfig {
    LimiterConfig::new(PRESET_INTERVAL, 60)
}

fn default_chat() -> LimiterConfig {
    LimiterConfig::new(PRESET_INTERVAL, 20)
}

fn default_strict() -> LimiterConfig {
    LimiterConfig::new(PRESET_INTERVAL, 10)
}

impl PresetsConfig {
    /// Validate every preset.
    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.chat.validate()?;
        self.strict.validate()
    }
}

/// The limiters shared by request handlers.
///
/// Built once at startup and handed to whatever needs it; there is no global
/// instance.
#[derive(Clone)]
pub struct Limiters {
    /// 60 requests per minute by default
    pub api: Arc<RateLimiter>,
    /// 20 requests per minute by default
    pub chat: Arc<RateLimiter>,
    /// 10 requests per minute by default
    pub strict: Arc<RateLimiter>,
}

impl Limiters {
    /// Build the registry on the system clock.
    pub fn new(presets: &PresetsConfig, store: StoreConfig) -> Result<Self> {
        Self::with_clock(presets, store, Arc::new(SystemClock))
    }

    /// Build the registry on a shared time source.
    pub fn with_clock(
        presets: &PresetsConfig,
        store: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let build = |config: LimiterConfig| -> Result<Arc<RateLimiter>> {
            Ok(Arc::new(RateLimiter::with_clock(config, store, clock.clone())?))
        };

        let limiters = Self {
            api: build(presets.api)?,
            chat: build(presets.chat)?,
            strict: build(presets.strict)?,
        };

        info!(
            api = limiters.api.limit(),
            chat = limiters.chat.limit(),
            strict = limiters.strict.limit(),
            "Rate limiters initialized"
        );

        Ok(limiters)
    }

    /// Look up a limiter by its preset name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<RateLimiter>> {
        match name {
            "api" => Some(&self.api),
            "chat" => Some(&self.chat),
            "strict" => Some(&self.strict),
            _ => None,
        }
    }

    /// Start a background sweeper for each limiter.
    pub fn spawn_sweepers(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.api.spawn_sweeper(),
            self.chat.spawn_sweeper(),
            self.strict.spawn_sweeper(),
        ]
    }
}
