//! Limit configuration per tenant.
//!
//! Defaults mirror a conservative paid-tier shape: generous tenant-wide
//! ceilings, tighter per-key limits, and endpoint limits scaled to the
//! relative cost of each operation. Burst capacities default to twice
//! the per-minute rate but stay independently configurable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Tenant-wide request and token ceilings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalLimit {
    /// Requests per minute across the whole tenant
    pub requests_per_minute: u64,
    /// Requests per day across the whole tenant
    pub requests_per_day: u64,
    /// LLM tokens per minute across the whole tenant
    pub tokens_per_minute: u64,
    /// LLM tokens per day across the whole tenant
    pub tokens_per_day: u64,
}

impl Default for GlobalLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 1000,
            requests_per_day: 100_000,
            tokens_per_minute: 100_000,
            tokens_per_day: 10_000_000,
        }
    }
}

/// Per-API-key limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyLimit {
    /// Requests per minute for one API key
    pub requests_per_minute: u64,
    /// LLM tokens per minute for one API key
    pub tokens_per_minute: u64,
}

impl Default for ApiKeyLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            tokens_per_minute: 10_000,
        }
    }
}

/// Per-endpoint limits with request burst headroom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointLimit {
    /// Requests per minute for the endpoint
    pub requests_per_minute: u64,
    /// LLM tokens per minute for the endpoint; zero disables the
    /// token dimension (e.g. for token-less operations)
    pub tokens_per_minute: u64,
    /// Request bucket capacity; admits short bursts above the
    /// per-minute rate
    pub burst_capacity: u64,
}

impl Default for EndpointLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 100_000,
            burst_capacity: 120,
        }
    }
}

/// Per-client-IP backstop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpLimit {
    /// Requests per minute from one client address
    pub requests_per_minute: u64,
}

impl Default for IpLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
        }
    }
}

/// In-flight request bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyLimit {
    /// Maximum simultaneous in-flight requests per tenant; zero
    /// disables the gate
    pub max_concurrent: u32,
    /// Requests allowed to wait for a permit; zero rejects immediately
    pub queue_depth: u32,
    /// Longest a queued request waits before rejection
    #[serde(with = "humantime_serde")]
    pub queue_timeout: Duration,
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            queue_depth: 0,
            queue_timeout: Duration::from_secs(5),
        }
    }
}

/// Complete limit set for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantLimits {
    /// Tenant-wide ceilings
    pub global: GlobalLimit,
    /// Per-API-key limits
    pub api_key: ApiKeyLimit,
    /// Endpoint limits keyed by normalized endpoint path
    pub endpoints: HashMap<String, EndpointLimit>,
    /// Per-client-IP backstop
    pub ip: IpLimit,
    /// In-flight request bounds
    pub concurrency: ConcurrencyLimit,
    /// Token bucket capacity as a multiple of the per-minute token rate
    pub burst_multiplier: f64,
}

impl Default for TenantLimits {
    fn default() -> Self {
        Self {
            global: GlobalLimit::default(),
            api_key: ApiKeyLimit::default(),
            endpoints: default_endpoint_limits(),
            ip: IpLimit::default(),
            concurrency: ConcurrencyLimit::default(),
            burst_multiplier: 2.0,
        }
    }
}

impl TenantLimits {
    /// Token bucket capacity for a per-minute token rate
    #[must_use]
    pub fn token_bucket_capacity(&self, tokens_per_minute: u64) -> u64 {
        let multiplier = if self.burst_multiplier >= 1.0 {
            self.burst_multiplier
        } else {
            1.0
        };
        let scaled = (tokens_per_minute as f64) * multiplier;
        if scaled >= u64::MAX as f64 {
            u64::MAX
        } else {
            scaled as u64
        }
    }

    /// Limit entry for a normalized endpoint path, if configured
    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<&EndpointLimit> {
        self.endpoints.get(path)
    }
}

/// Default endpoint limits, scaled by operation cost: chat-style
/// completion endpoints are expensive, embeddings are cheap.
#[must_use]
pub fn default_endpoint_limits() -> HashMap<String, EndpointLimit> {
    let chat = EndpointLimit {
        requests_per_minute: 60,
        tokens_per_minute: 100_000,
        burst_capacity: 120,
    };
    let embeddings = EndpointLimit {
        requests_per_minute: 1000,
        tokens_per_minute: 500_000,
        burst_capacity: 2000,
    };

    HashMap::from([
        ("/v1/chat/completions".to_string(), chat.clone()),
        ("/v1/messages".to_string(), chat.clone()),
        ("/api/chat".to_string(), chat.clone()),
        ("/v1beta/generateContent".to_string(), chat),
        ("/v1/embeddings".to_string(), embeddings.clone()),
        ("/api/embeddings".to_string(), embeddings.clone()),
        ("/v1beta/embedContents".to_string(), embeddings),
    ])
}
