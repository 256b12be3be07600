//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use gateway_config::GatewayConfig;
use gateway_core::{GatewayError, GatewayResult, LLMProvider, ProviderSpec};
use gateway_providers::build_provider;
use gateway_ratelimit::{
    LimitsCache, MemoryCounterStore, RateLimiter, StaticLimitsSource,
};
use gateway_resilience::PolicySet;
use gateway_routing::{ProviderRegistry, Router, StaticProviderSource};
use gateway_telemetry::{Metrics, MetricsConfig};
use tracing::debug;

/// Shared state handed to every handler.
///
/// Cheap to clone; everything inside is reference-counted. Provider
/// clients are cached per `(tenant, id)` and rebuilt whenever the
/// registry serves a changed spec for that id.
#[derive(Clone)]
pub struct AppState {
    /// Loaded gateway configuration
    pub config: Arc<GatewayConfig>,
    /// Provider selection over the registry snapshot
    pub router: Arc<Router>,
    /// Per-provider circuit breaker and retry policies
    pub policies: Arc<PolicySet>,
    /// Admission control
    pub limiter: Arc<RateLimiter>,
    /// Prometheus registry and recording helpers
    pub metrics: Arc<Metrics>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
    clients: Arc<DashMap<String, CachedClient>>,
}

struct CachedClient {
    spec: Arc<ProviderSpec>,
    client: Arc<dyn LLMProvider>,
}

impl AppState {
    /// Create a builder
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }

    /// Client for a routed provider spec, built on first use and rebuilt
    /// when the provider's configuration changed since it was cached.
    ///
    /// # Errors
    /// Returns error if the client cannot be constructed, e.g. the
    /// configured API key environment variable is unset.
    pub fn provider_for(&self, spec: &Arc<ProviderSpec>) -> GatewayResult<Arc<dyn LLMProvider>> {
        let key = format!("{}/{}", spec.tenant, spec.id);

        if let Some(cached) = self.clients.get(&key) {
            if cached.spec.as_ref() == spec.as_ref() {
                return Ok(Arc::clone(&cached.client));
            }
        }

        debug!(provider = %spec.id, "building provider client");
        let client = build_provider(spec)?;
        self.clients.insert(
            key,
            CachedClient {
                spec: Arc::clone(spec),
                client: Arc::clone(&client),
            },
        );
        Ok(client)
    }
}

/// Builder for [`AppState`]. Components not supplied are derived from
/// the configuration.
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<GatewayConfig>,
    router: Option<Arc<Router>>,
    policies: Option<Arc<PolicySet>>,
    limiter: Option<Arc<RateLimiter>>,
    metrics: Option<Arc<Metrics>>,
}

impl AppStateBuilder {
    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a pre-built router
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Set a pre-built policy set
    #[must_use]
    pub fn policies(mut self, policies: PolicySet) -> Self {
        self.policies = Some(Arc::new(policies));
        self
    }

    /// Set a pre-built rate limiter
    #[must_use]
    pub fn limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(Arc::new(limiter));
        self
    }

    /// Set a pre-built metrics registry
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    /// Assemble the state, deriving any missing component from the
    /// configuration.
    ///
    /// # Errors
    /// Returns error if the initial provider registry load fails or the
    /// metrics registry cannot be created.
    pub async fn build(self) -> GatewayResult<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(
                Metrics::new(&MetricsConfig::default())
                    .map_err(|err| GatewayError::internal(err.to_string()))?,
            ),
        };

        let router = match self.router {
            Some(router) => router,
            None => {
                let source = Arc::new(StaticProviderSource::new(config.providers.clone()));
                let registry = ProviderRegistry::new(source).await?;
                Arc::new(Router::new(Arc::new(registry)))
            }
        };

        let policies = match self.policies {
            Some(policies) => policies,
            None => {
                let hook_metrics = Arc::clone(&metrics);
                Arc::new(
                    PolicySet::new(
                        config.resilience.circuit_breaker.clone(),
                        config.resilience.retry.clone(),
                    )
                    .with_hook(Arc::new(move |provider, state| {
                        hook_metrics.record_circuit_transition(provider, state.as_str());
                    })),
                )
            }
        };

        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => {
                let source = StaticLimitsSource::new(config.rate_limits.tenants.clone())
                    .with_fallback(config.rate_limits.defaults.clone());
                let cache = LimitsCache::new(Arc::new(source));
                Arc::new(RateLimiter::new(Arc::new(MemoryCounterStore::new()), cache))
            }
        };

        Ok(AppState {
            config,
            router,
            policies,
            limiter,
            metrics,
            started_at: Instant::now(),
            clients: Arc::new(DashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gateway_core::{ProviderId, ProviderKind, RoutingStrategy, TenantId};
    use std::collections::HashMap;
    use std::time::Duration;

    fn spec(id: &str, base_url: &str) -> Arc<ProviderSpec> {
        Arc::new(ProviderSpec {
            id: ProviderId::new(id).expect("valid id"),
            tenant: TenantId::default_tenant(),
            kind: ProviderKind::Ollama,
            base_url: base_url.to_string(),
            api_key_env: None,
            headers: HashMap::new(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
            priority: 0,
            active: true,
            routing: RoutingStrategy::ByUser,
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn build_derives_components_from_config() {
        let state = AppState::builder()
            .config(GatewayConfig::default())
            .build()
            .await
            .expect("state builds");

        assert!(state.router.registry().snapshot().await.specs().is_empty());
        assert!(state.policies.states().is_empty());
    }

    #[tokio::test]
    async fn provider_clients_are_cached_until_the_spec_changes() {
        let state = AppState::builder().build().await.expect("state builds");

        let first = state
            .provider_for(&spec("local", "http://localhost:11434"))
            .expect("client builds");
        let second = state
            .provider_for(&spec("local", "http://localhost:11434"))
            .expect("client builds");
        assert!(Arc::ptr_eq(&first, &second));

        let moved = state
            .provider_for(&spec("local", "http://localhost:11435"))
            .expect("client builds");
        assert!(!Arc::ptr_eq(&first, &moved));
    }
}
