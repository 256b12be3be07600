//! Dialect-shaped error responses.

use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::GatewayError;
use gateway_dialects::Dialect;
use gateway_ratelimit::RateLimitStatus;
use tracing::warn;

/// A pipeline failure bound to the dialect of the route it happened on,
/// so the error body matches what the caller's SDK expects to parse.
#[derive(Debug)]
pub struct ApiError {
    /// Dialect whose error body shape to render
    pub dialect: Dialect,
    /// Underlying failure
    pub error: GatewayError,
}

impl ApiError {
    /// Bind an error to a dialect
    #[must_use]
    pub fn new(dialect: Dialect, error: GatewayError) -> Self {
        Self { dialect, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = self.dialect.encode_error(&self.error);

        if status.is_server_error() {
            warn!(
                dialect = %self.dialect,
                status = status.as_u16(),
                error = %self.error,
                "request failed"
            );
        }

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_after) = self.error.retry_after() {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if let GatewayError::RateLimited {
            limit, remaining, ..
        } = &self.error
        {
            insert_numeric(&mut response, "x-ratelimit-limit", *limit);
            insert_numeric(&mut response, "x-ratelimit-remaining", *remaining);
        }

        response
    }
}

/// Attach `X-RateLimit-*` headers from an admission verdict to a
/// successful response.
pub(crate) fn apply_rate_limit_headers(response: &mut Response, status: Option<&RateLimitStatus>) {
    if let Some(status) = status {
        insert_numeric(response, "x-ratelimit-limit", status.limit);
        insert_numeric(response, "x-ratelimit-remaining", status.remaining);
        insert_numeric(response, "x-ratelimit-reset", status.reset_after.as_secs());
    }
}

fn insert_numeric(response: &mut Response, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(name, value);
    }
}
