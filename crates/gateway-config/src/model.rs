//! Configuration model for the gateway.
//!
//! Each section composes the config type owned by its subsystem crate:
//! [`TenantLimits`] from the rate limiter, [`CircuitBreakerConfig`] and
//! [`RetryConfig`] from the resilience layer, [`LoggingConfig`] from
//! telemetry. Every field has a serde default so a partial file, or none
//! at all, yields a runnable configuration.

use gateway_core::ProviderSpec;
use gateway_ratelimit::TenantLimits;
use gateway_resilience::{CircuitBreakerConfig, RetryConfig};
use gateway_telemetry::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::loader::ConfigError;

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Log output settings
    pub logging: LoggingConfig,
    /// Providers available at startup
    pub providers: Vec<ProviderSpec>,
    /// Circuit breaker and retry tuning shared by all providers
    pub resilience: ResilienceConfig,
    /// Admission control limits
    pub rate_limits: RateLimitConfig,
}

impl GatewayConfig {
    /// Check the cross-field constraints serde cannot express.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::invalid("server.host cannot be empty"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid("server.max_body_bytes must be positive"));
        }

        let breaker = &self.resilience.circuit_breaker;
        if !(breaker.failure_ratio > 0.0 && breaker.failure_ratio <= 1.0) {
            return Err(ConfigError::invalid(format!(
                "resilience.circuit_breaker.failure_ratio must be in (0, 1], got {}",
                breaker.failure_ratio
            )));
        }
        if breaker.minimum_throughput == 0 {
            return Err(ConfigError::invalid(
                "resilience.circuit_breaker.minimum_throughput must be positive",
            ));
        }

        let retry = &self.resilience.retry;
        if retry.multiplier < 1.0 {
            return Err(ConfigError::invalid(format!(
                "resilience.retry.multiplier must be at least 1.0, got {}",
                retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::invalid(format!(
                "resilience.retry.jitter must be in [0, 1], got {}",
                retry.jitter
            )));
        }

        let mut seen = HashSet::new();
        for spec in &self.providers {
            if spec.base_url.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "provider {} has an empty base_url",
                    spec.id
                )));
            }
            if !seen.insert((spec.tenant.clone(), spec.id.clone())) {
                return Err(ConfigError::invalid(format!(
                    "provider {} is defined twice for tenant {}",
                    spec.id, spec.tenant
                )));
            }
        }

        Ok(())
    }
}

/// HTTP listener and request lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Ceiling on a single request, long enough for streamed completions
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
    /// How long in-flight requests may drain during shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(300),
            max_body_bytes: 10 * 1024 * 1024,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Socket address string for the listener
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resilience tuning shared by every provider policy.
///
/// A provider's own `max_retries` overrides the retry attempt budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry backoff settings
    pub retry: RetryConfig,
}

/// Admission control limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Limits for tenants without an explicit override
    pub defaults: TenantLimits,
    /// Per-tenant overrides keyed by tenant id
    pub tenants: HashMap<String, TenantLimits>,
}
