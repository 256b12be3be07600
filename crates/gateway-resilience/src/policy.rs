//! Composed resilience policy for provider calls.
//!
//! Retry wraps the circuit breaker: every attempt first consults the
//! breaker, so an open circuit fails the whole call at attempt one, and
//! each attempt's outcome feeds the breaker's sample window.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, TransitionHook};
use crate::retry::{RetryConfig, RetryPolicy};
use dashmap::DashMap;
use gateway_core::{GatewayError, ProviderSpec};
use std::future::Future;
use std::sync::Arc;

/// Circuit breaker and retry, composed for a single provider
pub struct ResiliencePolicy {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl ResiliencePolicy {
    /// Create a policy from its parts
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    /// The circuit breaker guarding this provider
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Execute an operation under the circuit breaker and retry policy.
    ///
    /// Only upstream failures are recorded into the breaker; local
    /// rejections such as validation errors leave its window untouched.
    ///
    /// # Errors
    /// Returns `CircuitOpen` without calling the operation when the
    /// breaker rejects, otherwise the operation's last error once
    /// retries are exhausted.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.retry
            .execute(|| async {
                self.breaker.check()?;
                match operation().await {
                    Ok(value) => {
                        self.breaker.record_success();
                        Ok(value)
                    }
                    Err(error) => {
                        if error.is_upstream_failure() {
                            self.breaker.record_failure();
                        }
                        Err(error)
                    }
                }
            })
            .await
    }
}

/// Per-provider resilience policies, created lazily and kept for the
/// process lifetime so breaker state survives provider cache refreshes.
pub struct PolicySet {
    circuit_config: CircuitBreakerConfig,
    retry_config: RetryConfig,
    hook: Option<TransitionHook>,
    policies: DashMap<String, Arc<ResiliencePolicy>>,
}

impl PolicySet {
    /// Create a policy set from base configurations
    #[must_use]
    pub fn new(circuit_config: CircuitBreakerConfig, retry_config: RetryConfig) -> Self {
        Self {
            circuit_config,
            retry_config,
            hook: None,
            policies: DashMap::new(),
        }
    }

    /// Attach a transition observer applied to every breaker created here
    #[must_use]
    pub fn with_hook(mut self, hook: TransitionHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Get or create the policy for a provider. Retry attempts come from
    /// the provider spec; breaker thresholds come from the base config.
    pub fn policy_for(&self, spec: &ProviderSpec) -> Arc<ResiliencePolicy> {
        self.policies
            .entry(spec.id.to_string())
            .or_insert_with(|| {
                let mut breaker =
                    CircuitBreaker::new(spec.id.as_str(), self.circuit_config.clone());
                if let Some(hook) = &self.hook {
                    breaker = breaker.with_hook(Arc::clone(hook));
                }
                let retry = RetryPolicy::new(RetryConfig {
                    max_retries: spec.max_retries,
                    ..self.retry_config.clone()
                });
                Arc::new(ResiliencePolicy::new(Arc::new(breaker), retry))
            })
            .clone()
    }

    /// Snapshot of every known breaker's state, for health reporting
    #[must_use]
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        self.policies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().breaker().state()))
            .collect()
    }
}
