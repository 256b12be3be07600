//! Gateway error taxonomy.
//!
//! Every failure in the request pipeline is one of these variants. The
//! variant determines the HTTP status, whether the resilience layer may
//! retry it, and the machine-readable code surfaced to callers.

use crate::types::TypeError;
use http::StatusCode;
use std::time::Duration;

/// Result alias used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Unified error type for the gateway request pipeline
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Request failed validation against the canonical model
    #[error("validation failed: {message}")]
    Validation {
        /// Human-readable description
        message: String,
        /// Field that failed, if attributable
        field: Option<String>,
        /// Machine-readable code
        code: String,
    },

    /// Inbound body could not be parsed as the dialect's expected shape
    #[error("unsupported {dialect} payload: {detail}")]
    UnsupportedPayload {
        /// Dialect that rejected the body
        dialect: String,
        /// What was wrong with it
        detail: String,
    },

    /// Caller could not be authenticated
    #[error("authentication failed: {message}")]
    Authentication {
        /// Human-readable description
        message: String,
    },

    /// Routing found no active provider matching the request
    #[error("no eligible provider for tenant {tenant}")]
    NoEligibleProvider {
        /// Tenant whose provider set was searched
        tenant: String,
    },

    /// Circuit breaker is open for the selected provider
    #[error("circuit open for provider {provider}, retry in {retry_after:?}")]
    CircuitOpen {
        /// Provider whose circuit is open
        provider: String,
        /// Remaining break duration
        retry_after: Duration,
    },

    /// Request rejected by the rate limiter
    #[error("rate limit exceeded on {dimension}: {message}")]
    RateLimited {
        /// Dimension that rejected (ip, tenant, api_key, endpoint, concurrency)
        dimension: String,
        /// Human-readable description
        message: String,
        /// Permit limit of the rejecting dimension
        limit: u64,
        /// Permits remaining (zero on rejection, kept for header symmetry)
        remaining: u64,
        /// Suggested wait before retrying
        retry_after: Duration,
    },

    /// Upstream call did not complete within the per-attempt timeout
    #[error("provider {provider} timed out after {timeout:?}")]
    Timeout {
        /// Provider that timed out
        provider: String,
        /// Configured per-attempt timeout
        timeout: Duration,
    },

    /// Upstream connection could not be established or was dropped
    #[error("connection to provider {provider} failed: {detail}")]
    Connection {
        /// Provider that was unreachable
        provider: String,
        /// Transport-level detail
        detail: String,
    },

    /// Upstream returned a non-success HTTP status
    #[error("provider {provider} returned status {status}: {message}")]
    Provider {
        /// Provider that responded
        provider: String,
        /// HTTP status code from the upstream
        status: u16,
        /// Upstream error message
        message: String,
    },

    /// Upstream response body could not be parsed into the canonical model
    #[error("provider {provider} returned an unreadable response: {detail}")]
    UpstreamDecode {
        /// Provider whose body failed to parse
        provider: String,
        /// Parse failure detail
        detail: String,
    },

    /// Requested model is not known to the selected provider
    #[error("model {model} not found")]
    ModelNotFound {
        /// Model that was requested
        model: String,
    },

    /// Invariant violation or unexpected internal failure
    #[error("internal error: {message}")]
    Internal {
        /// Description for the logs; callers see a generic message
        message: String,
    },
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create an unsupported-payload error for a dialect decoder
    pub fn unsupported_payload(dialect: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnsupportedPayload {
            dialect: dialect.into(),
            detail: detail.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a no-eligible-provider error
    pub fn no_eligible_provider(tenant: impl Into<String>) -> Self {
        Self::NoEligibleProvider {
            tenant: tenant.into(),
        }
    }

    /// Create a circuit-open error
    pub fn circuit_open(provider: impl Into<String>, retry_after: Duration) -> Self {
        Self::CircuitOpen {
            provider: provider.into(),
            retry_after,
        }
    }

    /// Create a rate-limited error
    pub fn rate_limited(
        dimension: impl Into<String>,
        message: impl Into<String>,
        limit: u64,
        retry_after: Duration,
    ) -> Self {
        Self::RateLimited {
            dimension: dimension.into(),
            message: message.into(),
            limit,
            remaining: 0,
            retry_after,
        }
    }

    /// Create a timeout error
    pub fn timeout(provider: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            timeout,
        }
    }

    /// Create a connection error
    pub fn connection(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Connection {
            provider: provider.into(),
            detail: detail.into(),
        }
    }

    /// Create a provider-status error
    pub fn provider_status(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an upstream-decode error
    pub fn upstream_decode(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UpstreamDecode {
            provider: provider.into(),
            detail: detail.into(),
        }
    }

    /// Create a model-not-found error
    pub fn model_not_found(model: impl Into<String>) -> Self {
        Self::ModelNotFound {
            model: model.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the resilience layer may retry this failure.
    ///
    /// Only the transitory class qualifies: timeouts, connection failures,
    /// and upstream 429/503/408. Everything else propagates immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } => true,
            Self::Provider { status, .. } => matches!(status, 408 | 429 | 503),
            _ => false,
        }
    }

    /// Whether this failure counts against the provider's circuit breaker.
    ///
    /// Gateway-local rejections (validation, routing, admission, the
    /// breaker's own fast-fail) carry no signal about upstream health.
    #[must_use]
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Connection { .. }
                | Self::Provider { .. }
                | Self::UpstreamDecode { .. }
        )
    }

    /// HTTP status to surface to the caller
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::UnsupportedPayload { .. } => StatusCode::BAD_REQUEST,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NoEligibleProvider { .. }
            | Self::Connection { .. }
            | Self::UpstreamDecode { .. } => StatusCode::BAD_GATEWAY,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Provider { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Suggested wait before the caller retries, when one applies
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } | Self::RateLimited { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// OpenAI-style error type string, reused by the other dialect shapes
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::UnsupportedPayload { .. } => "invalid_request_error",
            Self::Authentication { .. } => "authentication_error",
            Self::ModelNotFound { .. } => "not_found_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::CircuitOpen { .. } | Self::NoEligibleProvider { .. } => "overloaded_error",
            Self::Timeout { .. } => "timeout_error",
            _ => "api_error",
        }
    }

    /// Machine-readable error code for error bodies
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid_request",
            Self::UnsupportedPayload { .. } => "unsupported_payload",
            Self::Authentication { .. } => "invalid_api_key",
            Self::NoEligibleProvider { .. } => "no_eligible_provider",
            Self::CircuitOpen { .. } => "provider_unavailable",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::Timeout { .. } => "upstream_timeout",
            Self::Connection { .. } => "upstream_unreachable",
            Self::Provider { .. } => "upstream_error",
            Self::UpstreamDecode { .. } => "upstream_invalid_response",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<TypeError> for GatewayError {
    fn from(err: TypeError) -> Self {
        Self::Validation {
            message: err.to_string(),
            field: Some(err.field.to_string()),
            code: "invalid_value".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::timeout("p1", Duration::from_secs(30)).is_retryable());
        assert!(GatewayError::connection("p1", "refused").is_retryable());
        assert!(GatewayError::provider_status("p1", 429, "slow down").is_retryable());
        assert!(GatewayError::provider_status("p1", 503, "overloaded").is_retryable());
        assert!(GatewayError::provider_status("p1", 408, "timeout").is_retryable());

        assert!(!GatewayError::provider_status("p1", 400, "bad request").is_retryable());
        assert!(!GatewayError::provider_status("p1", 500, "boom").is_retryable());
        assert!(!GatewayError::provider_status("p1", 502, "bad gateway").is_retryable());
        assert!(!GatewayError::validation("bad", None, "invalid").is_retryable());
        assert!(!GatewayError::rate_limited("ip", "too fast", 100, Duration::from_secs(1))
            .is_retryable());
        assert!(!GatewayError::circuit_open("p1", Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn test_upstream_failure_classification() {
        assert!(GatewayError::timeout("p1", Duration::from_secs(1)).is_upstream_failure());
        assert!(GatewayError::upstream_decode("p1", "bad json").is_upstream_failure());
        assert!(GatewayError::provider_status("p1", 500, "boom").is_upstream_failure());

        assert!(!GatewayError::circuit_open("p1", Duration::from_secs(1)).is_upstream_failure());
        assert!(!GatewayError::no_eligible_provider("acme").is_upstream_failure());
        assert!(!GatewayError::validation("bad", None, "x").is_upstream_failure());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::unsupported_payload("openai", "not an object").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::no_eligible_provider("acme").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::circuit_open("p1", Duration::from_secs(10)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::rate_limited("tenant", "quota", 1000, Duration::from_secs(60))
                .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::timeout("p1", Duration::from_secs(30)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::provider_status("p1", 404, "nope").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_retry_after_surfaced() {
        let err = GatewayError::circuit_open("p1", Duration::from_secs(17));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(17)));

        let err = GatewayError::rate_limited("api_key", "minute quota", 100, Duration::from_secs(42));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));

        assert_eq!(GatewayError::internal("boom").retry_after(), None);
    }

    #[test]
    fn test_type_error_conversion() {
        let err: GatewayError = TypeError {
            field: "temperature",
            reason: "must be between 0.0 and 2.0, got 3.0".to_string(),
        }
        .into();
        match err {
            GatewayError::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("temperature"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
