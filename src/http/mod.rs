//! HTTP admission layer: identifier resolution, 429 responses and the
//! standalone admission service.

mod adapter;
mod identity;
mod server;
mod service;

pub use adapter::{
    admit, apply_rate_limit, enforce, rate_limit_headers, with_rate_limit, AuthenticatedUser,
    RateLimitRejection, REJECTION_MESSAGE, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use identity::{client_identifier, FORWARDED_FOR, REAL_IP, UNKNOWN_CLIENT};
pub use server::HttpServer;
pub use service::{router, CheckRequest, StatusResponse};
