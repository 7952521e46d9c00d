//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod limiter;
mod presets;

pub use bucket::Bucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{LimiterConfig, RateLimitStatus, RateLimiter, StoreConfig};
pub use presets::{Limiters, PresetsConfig};
