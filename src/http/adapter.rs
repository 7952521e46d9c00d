//! HTTP admission glue between request handlers and a [`RateLimiter`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use super::identity::client_identifier;
use crate::error::RateLimitExceeded;
use crate::ratelimit::{RateLimitStatus, RateLimiter};

/// Body text of every rejection.
pub const REJECTION_MESSAGE: &str = "Too many requests";

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// User id of an authenticated caller, placed in request extensions by the
/// authentication layer in front of [`enforce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// A `429 Too Many Requests` response waiting to be sent.
#[derive(Debug, Clone)]
pub struct RateLimitRejection {
    exceeded: RateLimitExceeded,
}

impl RateLimitRejection {
    /// The condition that caused the rejection.
    pub fn exceeded(&self) -> &RateLimitExceeded {
        &self.exceeded
    }
}

impl From<RateLimitExceeded> for RateLimitRejection {
    fn from(exceeded: RateLimitExceeded) -> Self {
        Self { exceeded }
    }
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": REJECTION_MESSAGE })),
        )
            .into_response();

        let headers = response.headers_mut();
        headers.insert(RETRY_AFTER, HeaderValue::from(self.exceeded.retry_after_secs()));
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.exceeded.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
        headers.insert(
            X_RATELIMIT_RESET,
            HeaderValue::from(epoch_secs_ceil(self.exceeded.reset_at)),
        );

        response
    }
}

/// Headers describing the quota left after an admitted request.
pub fn rate_limit_headers(status: &RateLimitStatus) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(epoch_secs_ceil(status.reset_at)));
    headers
}

/// Admit a request for `identifier`, keeping the resulting quota on success.
pub fn admit(
    limiter: &RateLimiter,
    identifier: &str,
) -> Result<RateLimitStatus, RateLimitRejection> {
    limiter.check(identifier).map_err(|exceeded| {
        info!(
            key = %exceeded.identifier,
            limit = exceeded.limit,
            retry_after_secs = exceeded.retry_after_secs(),
            "Request rejected by rate limiter"
        );
        RateLimitRejection::from(exceeded)
    })
}

/// Check `identifier` against `limiter`.
///
/// Returns `None` when the caller may proceed, or the rejection to send back.
pub fn apply_rate_limit(limiter: &RateLimiter, identifier: &str) -> Option<RateLimitRejection> {
    admit(limiter, identifier).err()
}

/// Resolve the client identifier for `request` and check it against `limiter`.
pub fn with_rate_limit<B>(
    request: &axum::http::Request<B>,
    limiter: &RateLimiter,
    user_id: Option<&str>,
) -> Option<RateLimitRejection> {
    let identifier = client_identifier(request.headers(), user_id);
    apply_rate_limit(limiter, &identifier)
}

/// Middleware gating every request through one limiter.
///
/// Use with [`axum::middleware::from_fn_with_state`]. Admitted responses carry
/// the `X-RateLimit-*` headers.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = {
        let user_id = request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.as_str());
        client_identifier(request.headers(), user_id)
    };

    match admit(&limiter, &identifier) {
        Ok(status) => {
            let mut response = next.run(request).await;
            response.headers_mut().extend(rate_limit_headers(&status));
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}

fn epoch_secs_ceil(at: DateTime<Utc>) -> i64 {
    (at.timestamp_millis() + 999).div_euclid(1000)
}
