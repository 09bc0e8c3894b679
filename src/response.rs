use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::rate_limiter::RateLimitResult;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a 429 response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitErrorBody {
    pub error: String,
    pub retry_after_seconds: u64,
}

/// Set `x-ratelimit-*` headers and, when rejected, `retry-after`.
///
/// `x-ratelimit-reset` is the reset time in epoch seconds; `retry-after` is a
/// delay in seconds. Both round up.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(ceil_secs(result.reset_at)));

    if let Some(retry_after_ms) = result.retry_after_ms {
        headers.insert(RETRY_AFTER, HeaderValue::from(ceil_secs(retry_after_ms)));
    }
}

/// Attach rate-limit headers to an already built response.
pub fn with_rate_limit_headers(mut response: Response, result: &RateLimitResult) -> Response {
    apply_rate_limit_headers(response.headers_mut(), result);
    response
}

/// Standard 429 response for a rejected [`RateLimitResult`].
pub fn create_rate_limit_error_response(result: &RateLimitResult, message: &str) -> Response {
    let body = RateLimitErrorBody {
        error: message.to_string(),
        retry_after_seconds: ceil_secs(result.retry_after_ms.unwrap_or(1)),
    };
    let response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    with_rate_limit_headers(response, result)
}

fn ceil_secs(millis: u64) -> u64 {
    millis.div_ceil(1000)
}
