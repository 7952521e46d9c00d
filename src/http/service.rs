//! Admission service routes.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::adapter::{admit, rate_limit_headers};
use super::identity::client_identifier;
use crate::ratelimit::{Limiters, RateLimitStatus};

/// Optional body of a check request.
#[derive(Debug, Default, Deserialize)]
pub struct CheckRequest {
    /// Authenticated user id, if the caller knows it
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Quota for one identifier as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub identifier: String,
    pub limit: u64,
    pub remaining: u64,
    /// RFC 3339 timestamp
    pub reset_at: String,
}

impl StatusResponse {
    fn new(identifier: String, status: &RateLimitStatus) -> Self {
        Self {
            identifier,
            limit: status.limit,
            remaining: status.remaining,
            reset_at: status.reset_at.to_rfc3339(),
        }
    }
}

/// Build the service router over `limiters`.
pub fn router(limiters: Limiters) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/limiters/{name}/check", post(check))
        .route(
            "/v1/limiters/{name}/status/{identifier}",
            get(status).delete(reset),
        )
        .with_state(limiters)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Consume one request for the caller and report what is left.
#[instrument(skip_all, fields(limiter = %name))]
pub async fn check(
    State(limiters): State<Limiters>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(limiter) = limiters.by_name(&name) else {
        return unknown_limiter(&name);
    };

    let request = if body.is_empty() {
        CheckRequest::default()
    } else {
        match serde_json::from_slice::<CheckRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Received malformed check request");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Invalid request body" })),
                )
                    .into_response();
            }
        }
    };

    let identifier = client_identifier(&headers, request.user_id.as_deref());

    debug!(key = %identifier, "Processing check request");

    match admit(limiter, &identifier) {
        Ok(status) => {
            info!(key = %identifier, remaining = status.remaining, "Request admitted");
            (
                rate_limit_headers(&status),
                Json(StatusResponse::new(identifier, &status)),
            )
                .into_response()
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// Report the quota for an identifier without consuming it.
pub async fn status(
    State(limiters): State<Limiters>,
    Path((name, identifier)): Path<(String, String)>,
) -> Response {
    match limiters.by_name(&name) {
        Some(limiter) => {
            let status = limiter.status(&identifier);
            Json(StatusResponse::new(identifier, &status)).into_response()
        }
        None => unknown_limiter(&name),
    }
}

/// Clear an identifier's bucket.
pub async fn reset(
    State(limiters): State<Limiters>,
    Path((name, identifier)): Path<(String, String)>,
) -> Response {
    match limiters.by_name(&name) {
        Some(limiter) => {
            limiter.reset(&identifier);
            info!(limiter = %name, key = %identifier, "Rate limit reset");
            StatusCode::NO_CONTENT.into_response()
        }
        None => unknown_limiter(&name),
    }
}

fn unknown_limiter(name: &str) -> Response {
    warn!(limiter = %name, "Request for unknown limiter");
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Unknown limiter" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::identity::{FORWARDED_FOR, REAL_IP};
    use crate::ratelimit::{ManualClock, PresetsConfig, StoreConfig};
    use axum::http::HeaderValue;
    use std::sync::Arc;

    fn limiters() -> Limiters {
        Limiters::with_clock(
            &PresetsConfig::default(),
            StoreConfig::default(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
        .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn forwarded(addr: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(addr));
        headers
    }

    #[tokio::test]
    async fn test_check_admits_and_reports() {
        let limiters = limiters();

        let response = check(
            State(limiters.clone()),
            Path("chat".to_string()),
            forwarded("192.168.1.1"),
            Bytes::new(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "19");

        let body = json_body(response).await;
        assert_eq!(body["identifier"], "ip:192.168.1.1");
        assert_eq!(body["limit"], 20);
        assert_eq!(body["remaining"], 19);
    }

    #[tokio::test]
    async fn test_check_uses_user_id_from_body() {
        let limiters = limiters();

        let response = check(
            State(limiters.clone()),
            Path("strict".to_string()),
            forwarded("192.168.1.1"),
            Bytes::from_static(br#"{"user_id":"u-123"}"#),
        )
        .await;

        let body = json_body(response).await;
        assert_eq!(body["identifier"], "user:u-123");
        assert_eq!(limiters.strict.status("user:u-123").remaining, 9);
        assert_eq!(limiters.strict.status("ip:192.168.1.1").remaining, 10);
    }

    #[tokio::test]
    async fn test_check_rejects_when_exhausted() {
        let limiters = limiters();
        let mut headers = HeaderMap::new();
        headers.insert(REAL_IP, HeaderValue::from_static("10.0.0.9"));

        for _ in 0..10 {
            let response = check(
                State(limiters.clone()),
                Path("strict".to_string()),
                headers.clone(),
                Bytes::new(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = check(
            State(limiters.clone()),
            Path("strict".to_string()),
            headers,
            Bytes::new(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Too many requests" })
        );
    }

    #[tokio::test]
    async fn test_check_malformed_body() {
        let response = check(
            State(limiters()),
            Path("api".to_string()),
            HeaderMap::new(),
            Bytes::from_static(b"not json"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_limiter() {
        let response = check(
            State(limiters()),
            Path("bulk".to_string()),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await, json!({ "error": "Unknown limiter" }));
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let limiters = limiters();
        limiters.api.check("user:7").unwrap();
        limiters.api.check("user:7").unwrap();

        let response = status(
            State(limiters.clone()),
            Path(("api".to_string(), "user:7".to_string())),
        )
        .await;
        let body: StatusResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(body.limit, 60);
        assert_eq!(body.remaining, 58);
        assert_eq!(body.reset_at, "2023-11-14T22:14:20+00:00");

        let response = reset(
            State(limiters.clone()),
            Path(("api".to_string(), "user:7".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(limiters.api.status("user:7").remaining, 60);
    }
}
