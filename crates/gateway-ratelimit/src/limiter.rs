//! Multi-dimension admission control.
//!
//! Requests pass a cascade of checks before reaching a provider: client
//! IP, tenant-wide rates and daily quotas, per-API-key rates, then
//! per-endpoint rates, in that order. The first dimension to reject
//! wins and later dimensions are not consulted. Request rates use token
//! buckets sized for short bursts; the client IP backstop counts
//! against a fixed window.
//!
//! Token dimensions are admitted on an estimate before the provider
//! call; the actual consumption reported by the provider is recorded
//! afterwards into daily and monthly aggregates and never retroactively
//! rejects the request that produced it.

use chrono::{Timelike, Utc};
use gateway_core::error::{GatewayError, GatewayResult};
use gateway_core::types::TenantId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::LimitsCache;
use crate::concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
use crate::store::{CounterStore, LimitDecision, StoreResult};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(86_400);

/// Rough token estimate for admission checks, four characters per
/// token, never zero.
#[must_use]
pub fn estimate_tokens(content_chars: usize) -> u64 {
    ((content_chars / 4) as u64).max(1)
}

/// Identity and cost of one request, as seen by admission control.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Tenant the request bills to
    pub tenant: TenantId,
    /// Normalized endpoint path, e.g. `/v1/chat/completions`
    pub endpoint: String,
    /// Fingerprint of the presented API key, when one was presented
    pub api_key_id: Option<String>,
    /// Client address for the IP backstop
    pub client_ip: Option<String>,
    /// Estimated LLM tokens this request will consume; zero skips the
    /// token dimensions
    pub estimated_tokens: u64,
}

impl AdmissionRequest {
    /// Creates an admission request with no API key, no client IP and
    /// no token estimate.
    pub fn new(tenant: TenantId, endpoint: impl Into<String>) -> Self {
        Self {
            tenant,
            endpoint: endpoint.into(),
            api_key_id: None,
            client_ip: None,
            estimated_tokens: 0,
        }
    }

    /// Attaches an API key fingerprint.
    #[must_use]
    pub fn with_api_key_id(mut self, id: impl Into<String>) -> Self {
        self.api_key_id = Some(id.into());
        self
    }

    /// Attaches the client address.
    #[must_use]
    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Sets the token estimate.
    #[must_use]
    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = tokens;
        self
    }
}

/// Rate limit state reported back to clients in response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    /// Limit of the narrowest dimension checked
    pub limit: u64,
    /// Remaining allowance in that dimension
    pub remaining: u64,
    /// Time until the dimension replenishes
    pub reset_after: Duration,
}

/// Proof of admission. Holds the tenant's concurrency slot; dropping
/// the admission releases it.
#[derive(Debug)]
pub struct Admission {
    /// State of the last dimension checked, absent when every
    /// applicable dimension failed open
    pub status: Option<RateLimitStatus>,
    _permit: Option<ConcurrencyPermit>,
}

/// Cascaded rate limiter over a counter store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limits: LimitsCache,
    concurrency: ConcurrencyLimiter,
}

impl RateLimiter {
    /// Creates a limiter over `store` resolving limits through `limits`.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, limits: LimitsCache) -> Self {
        Self {
            store,
            limits,
            concurrency: ConcurrencyLimiter::new(),
        }
    }

    /// Backing store, exposed for health checks.
    #[must_use]
    pub fn store(&self) -> &dyn CounterStore {
        self.store.as_ref()
    }

    /// Runs the admission cascade for one request.
    ///
    /// A store failure on any dimension admits the request on that
    /// dimension; availability outranks precise enforcement here.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::RateLimited`] naming the dimension that
    /// rejected the request.
    pub async fn admit(&self, request: &AdmissionRequest) -> GatewayResult<Admission> {
        let tenant = &request.tenant;
        let limits = self.limits.get(tenant).await;
        let mut last: Option<(LimitDecision, Duration)> = None;

        if let Some(ip) = request.client_ip.as_deref() {
            if limits.ip.requests_per_minute > 0 {
                let outcome = self
                    .store
                    .check_fixed_window(
                        &format!("ratelimit:ip:{ip}"),
                        limits.ip.requests_per_minute,
                        MINUTE,
                    )
                    .await;
                if let Some(decision) = settle("ip", ip, outcome)? {
                    last = Some((decision, MINUTE));
                }
            }
        }

        if limits.global.requests_per_minute > 0 {
            let outcome = self
                .store
                .check_token_bucket(
                    &format!("ratelimit:tenant:{tenant}:global"),
                    limits.token_bucket_capacity(limits.global.requests_per_minute),
                    limits.global.requests_per_minute,
                    MINUTE,
                    1,
                )
                .await;
            if let Some(decision) = settle("tenant_requests", tenant.as_str(), outcome)? {
                last = Some((decision, MINUTE));
            }
        }

        if limits.global.requests_per_day > 0 {
            let outcome = self
                .store
                .check_fixed_window(
                    &format!("ratelimit:tenant:{tenant}:requests:day"),
                    limits.global.requests_per_day,
                    DAY,
                )
                .await;
            if let Some(decision) = settle("tenant_requests_day", tenant.as_str(), outcome)? {
                last = Some((decision, DAY));
            }
        }

        if request.estimated_tokens > 0 && limits.global.tokens_per_minute > 0 {
            let outcome = self
                .store
                .check_token_bucket(
                    &format!("ratelimit:tenant:{tenant}:tokens"),
                    limits.token_bucket_capacity(limits.global.tokens_per_minute),
                    limits.global.tokens_per_minute,
                    MINUTE,
                    request.estimated_tokens,
                )
                .await;
            if let Some(decision) = settle("tenant_tokens", tenant.as_str(), outcome)? {
                last = Some((decision, MINUTE));
            }
        }

        if request.estimated_tokens > 0 && limits.global.tokens_per_day > 0 {
            match self.store.get_usage(&daily_usage_key(tenant)).await {
                Ok(used) => {
                    if used.saturating_add(request.estimated_tokens) > limits.global.tokens_per_day
                    {
                        return Err(GatewayError::rate_limited(
                            "tenant_tokens_day",
                            format!("rate limit exceeded for tenant_tokens_day: {tenant}"),
                            limits.global.tokens_per_day,
                            until_utc_midnight(),
                        ));
                    }
                }
                Err(err) => {
                    warn!(
                        dimension = "tenant_tokens_day",
                        error = %err,
                        "rate limit store failed, admitting request"
                    );
                }
            }
        }

        if let Some(key_id) = request.api_key_id.as_deref() {
            if limits.api_key.requests_per_minute > 0 {
                let outcome = self
                    .store
                    .check_token_bucket(
                        &format!("ratelimit:tenant:{tenant}:apikey:{key_id}"),
                        limits.token_bucket_capacity(limits.api_key.requests_per_minute),
                        limits.api_key.requests_per_minute,
                        MINUTE,
                        1,
                    )
                    .await;
                if let Some(decision) = settle("api_key_requests", key_id, outcome)? {
                    last = Some((decision, MINUTE));
                }
            }

            if request.estimated_tokens > 0 && limits.api_key.tokens_per_minute > 0 {
                let outcome = self
                    .store
                    .check_token_bucket(
                        &format!("ratelimit:tenant:{tenant}:apikey:{key_id}:tokens"),
                        limits.token_bucket_capacity(limits.api_key.tokens_per_minute),
                        limits.api_key.tokens_per_minute,
                        MINUTE,
                        request.estimated_tokens,
                    )
                    .await;
                if let Some(decision) = settle("api_key_tokens", key_id, outcome)? {
                    last = Some((decision, MINUTE));
                }
            }
        }

        let endpoint = &request.endpoint;
        let endpoint_limit = limits.endpoint(endpoint).cloned().unwrap_or_default();

        if endpoint_limit.requests_per_minute > 0 {
            let outcome = self
                .store
                .check_token_bucket(
                    &format!("ratelimit:tenant:{tenant}:endpoint:{endpoint}"),
                    endpoint_limit.burst_capacity,
                    endpoint_limit.requests_per_minute,
                    MINUTE,
                    1,
                )
                .await;
            if let Some(decision) = settle("endpoint_requests", endpoint, outcome)? {
                last = Some((decision, MINUTE));
            }
        }

        if request.estimated_tokens > 0 && endpoint_limit.tokens_per_minute > 0 {
            let outcome = self
                .store
                .check_token_bucket(
                    &format!("ratelimit:tenant:{tenant}:endpoint:{endpoint}:tokens"),
                    limits.token_bucket_capacity(endpoint_limit.tokens_per_minute),
                    endpoint_limit.tokens_per_minute,
                    MINUTE,
                    request.estimated_tokens,
                )
                .await;
            if let Some(decision) = settle("endpoint_tokens", endpoint, outcome)? {
                last = Some((decision, MINUTE));
            }
        }

        let permit = if limits.concurrency.max_concurrent > 0 {
            Some(
                self.concurrency
                    .acquire(tenant, &limits.concurrency)
                    .await?,
            )
        } else {
            None
        };

        debug!(
            tenant = %tenant,
            endpoint = %endpoint,
            estimated_tokens = request.estimated_tokens,
            "request admitted"
        );

        Ok(Admission {
            status: last.map(|(decision, window)| RateLimitStatus {
                limit: decision.limit,
                remaining: decision.remaining,
                reset_after: window,
            }),
            _permit: permit,
        })
    }

    /// Records actual token consumption into the tenant's daily and
    /// monthly aggregates. Non-blocking: failures are logged, never
    /// surfaced, and recorded usage never rejects the request that
    /// produced it.
    pub async fn record_usage(&self, tenant: &TenantId, endpoint: &str, actual_tokens: u64) {
        if actual_tokens == 0 {
            return;
        }

        let now = Utc::now();
        let month = now.format("%Y-%m");
        let keys = [
            format!("usage:tenant:{tenant}:month:{month}:tokens"),
            format!("usage:tenant:{tenant}:endpoint:{endpoint}:month:{month}:tokens"),
            daily_usage_key(tenant),
        ];

        for key in keys {
            if let Err(err) = self.store.increment_usage(&key, actual_tokens).await {
                warn!(key = %key, error = %err, "failed to record token usage");
            }
        }
    }

    /// Total tokens the tenant consumed in the current calendar month.
    ///
    /// # Errors
    ///
    /// Propagates store errors; callers decide whether missing usage
    /// data is tolerable.
    pub async fn monthly_usage(&self, tenant: &TenantId) -> StoreResult<u64> {
        let month = Utc::now().format("%Y-%m");
        self.store
            .get_usage(&format!("usage:tenant:{tenant}:month:{month}:tokens"))
            .await
    }
}

fn settle(
    dimension: &'static str,
    identifier: &str,
    outcome: StoreResult<LimitDecision>,
) -> GatewayResult<Option<LimitDecision>> {
    match outcome {
        Ok(decision) if decision.allowed => Ok(Some(decision)),
        Ok(decision) => Err(GatewayError::rate_limited(
            dimension,
            format!("rate limit exceeded for {dimension}: {identifier}"),
            decision.limit,
            decision.retry_after.unwrap_or(MINUTE),
        )),
        Err(err) => {
            warn!(
                dimension,
                error = %err,
                "rate limit store failed, admitting request"
            );
            Ok(None)
        }
    }
}

fn daily_usage_key(tenant: &TenantId) -> String {
    format!(
        "usage:tenant:{tenant}:day:{}:tokens",
        Utc::now().format("%Y-%m-%d")
    )
}

fn until_utc_midnight() -> Duration {
    let elapsed = u64::from(Utc::now().num_seconds_from_midnight());
    Duration::from_secs(86_400_u64.saturating_sub(elapsed).max(1))
}
