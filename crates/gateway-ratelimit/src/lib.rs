//! Multi-dimension rate limiting.
//!
//! Admission control runs a cascade of checks per request: client IP,
//! tenant-wide rates and daily quotas, per-API-key rates, per-endpoint
//! rates, then the tenant's concurrency gate. Counters live behind the
//! [`store::CounterStore`] trait; the bundled in-memory store suits a
//! single gateway instance.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod concurrency;
pub mod limiter;
pub mod limits;
pub mod store;

pub use cache::{LimitsCache, LimitsSource, StaticLimitsSource};
pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
pub use limiter::{estimate_tokens, Admission, AdmissionRequest, RateLimiter, RateLimitStatus};
pub use limits::{
    ApiKeyLimit, ConcurrencyLimit, EndpointLimit, GlobalLimit, IpLimit, TenantLimits,
};
pub use store::{CounterStore, LimitDecision, MemoryCounterStore, StoreError};
