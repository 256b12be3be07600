//! Axum extractors for request metadata.
//!
//! All of these are infallible: a request with no tenant header lands in
//! the default tenant, a missing API key simply skips the per-key rate
//! dimension, and a missing request id gets a generated one.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header, request::Parts};
use gateway_core::types::ApiKey as CallerKey;
use gateway_core::TenantId;

/// Tenant the request bills against, from `x-tenant-id`
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantId);

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = parts
            .headers
            .get("x-tenant-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| TenantId::new(value).ok())
            .unwrap_or_else(TenantId::default_tenant);

        Ok(Self(tenant))
    }
}

/// Caller API key, when one was presented.
///
/// Checked in the order the dialects send them: `Authorization: Bearer`
/// (OpenAI, Ollama), `x-api-key` (Anthropic), `x-goog-api-key` (Gemini).
#[derive(Debug, Clone)]
pub struct OptionalApiKey(pub Option<CallerKey>);

impl OptionalApiKey {
    /// Stable non-reversible identifier for rate-limit counter keys.
    /// The raw key never becomes part of a counter key.
    #[must_use]
    pub fn rate_limit_id(&self) -> Option<String> {
        use std::hash::{Hash, Hasher};

        self.0.as_ref().map(|key| {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            key.as_str().hash(&mut hasher);
            format!("{:016x}", hasher.finish())
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OptionalApiKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        let raw = bearer
            .or_else(|| {
                parts
                    .headers
                    .get("x-api-key")
                    .and_then(|value| value.to_str().ok())
            })
            .or_else(|| {
                parts
                    .headers
                    .get("x-goog-api-key")
                    .and_then(|value| value.to_str().ok())
            });

        Ok(Self(raw.and_then(|value| CallerKey::new(value).ok())))
    }
}

/// Correlation id for logs, from `x-request-id` or `x-correlation-id`,
/// generated when the caller sent neither
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-request-id")
            .or_else(|| parts.headers.get("x-correlation-id"))
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

        Ok(Self(id))
    }
}

/// Client address for the IP rate dimension: first `x-forwarded-for`
/// hop, then `x-real-ip`, then the socket peer address
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                parts
                    .headers
                    .get("x-real-ip")
                    .and_then(|value| value.to_str().ok())
                    .map(String::from)
            })
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|info| info.0.ip().to_string())
            });

        Ok(Self(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[tokio::test]
    async fn tenant_defaults_when_header_missing() {
        let mut parts = parts(Request::builder().uri("/").body(()).unwrap()).await;

        let Tenant(tenant) = Tenant::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(tenant.as_str(), "default");
    }

    #[tokio::test]
    async fn tenant_reads_header() {
        let mut parts = parts(
            Request::builder()
                .uri("/")
                .header("x-tenant-id", "acme")
                .body(())
                .unwrap(),
        )
        .await;

        let Tenant(tenant) = Tenant::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(tenant.as_str(), "acme");
    }

    #[tokio::test]
    async fn api_key_checks_all_dialect_headers() {
        for (name, value) in [
            ("authorization", "Bearer sk-test-123"),
            ("x-api-key", "sk-test-123"),
            ("x-goog-api-key", "sk-test-123"),
        ] {
            let mut parts = parts(
                Request::builder()
                    .uri("/")
                    .header(name, value)
                    .body(())
                    .unwrap(),
            )
            .await;

            let OptionalApiKey(key) = OptionalApiKey::from_request_parts(&mut parts, &())
                .await
                .unwrap();
            assert_eq!(key.expect("key present").as_str(), "sk-test-123");
        }
    }

    #[tokio::test]
    async fn api_key_absent_without_headers() {
        let mut parts = parts(Request::builder().uri("/").body(()).unwrap()).await;

        let OptionalApiKey(key) = OptionalApiKey::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(key.is_none());
    }

    #[tokio::test]
    async fn rate_limit_id_is_stable_and_not_the_raw_key() {
        let key = OptionalApiKey(Some(CallerKey::new("sk-secret-value").unwrap()));

        let first = key.rate_limit_id().expect("id");
        let second = key.rate_limit_id().expect("id");
        assert_eq!(first, second);
        assert!(!first.contains("secret"));
    }

    #[tokio::test]
    async fn request_id_prefers_caller_header() {
        let mut parts = parts(
            Request::builder()
                .uri("/")
                .header("x-request-id", "req-1")
                .body(())
                .unwrap(),
        )
        .await;

        let RequestId(id) = RequestId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id, "req-1");
    }

    #[tokio::test]
    async fn request_id_falls_back_to_correlation_then_uuid() {
        let mut parts = parts(
            Request::builder()
                .uri("/")
                .header("x-correlation-id", "corr-9")
                .body(())
                .unwrap(),
        )
        .await;
        let RequestId(id) = RequestId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id, "corr-9");

        let mut parts = parts_without_headers().await;
        let RequestId(generated) = RequestId::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }

    async fn parts_without_headers() -> Parts {
        Request::builder().uri("/").body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn client_ip_takes_first_forwarded_hop() {
        let mut parts = parts(
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                .body(())
                .unwrap(),
        )
        .await;

        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ip.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn client_ip_none_without_any_source() {
        let mut parts = parts(Request::builder().uri("/").body(()).unwrap()).await;

        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(ip.is_none());
    }
}
