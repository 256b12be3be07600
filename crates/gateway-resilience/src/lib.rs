//! # Gateway Resilience
//!
//! Resilience patterns for provider calls:
//! - Circuit breaker with a ratio-based rolling sample window
//! - Retry policy with exponential backoff and jitter
//! - Composed per-provider policy (retry around the breaker)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod policy;
pub mod retry;

// Re-export main types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, TransitionHook};
pub use policy::{PolicySet, ResiliencePolicy};
pub use retry::{RetryConfig, RetryPolicy};
