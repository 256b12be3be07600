//! Provider selection.

use gateway_core::error::{GatewayError, GatewayResult};
use gateway_core::provider::{ProviderSpec, RoutingStrategy};
use std::sync::Arc;
use tracing::debug;

use crate::context::RouteContext;
use crate::registry::ProviderRegistry;

/// Selects the upstream provider for each request.
pub struct Router {
    registry: Arc<ProviderRegistry>,
}

impl Router {
    /// Creates a router over a provider registry.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// The registry backing this router.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Picks the provider for the given context.
    ///
    /// Eligible providers are the tenant's active providers whose
    /// routing strategy matches the transport context. Among those the
    /// lowest priority number wins; creation time and then provider id
    /// break ties, so selection is deterministic across restarts.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NoEligibleProvider`] when no provider
    /// matches. The caller surfaces this as a bad-gateway condition
    /// rather than falling back to an unrelated provider.
    pub async fn route(&self, context: &RouteContext) -> GatewayResult<Arc<ProviderSpec>> {
        let snapshot = self.registry.snapshot().await;

        let selected = snapshot
            .specs()
            .iter()
            .filter(|spec| spec.active && spec.tenant == context.tenant)
            .filter(|spec| {
                let header_value = match &spec.routing {
                    RoutingStrategy::ByHeader { name } => context.header(name),
                    _ => None,
                };
                spec.matches(&context.path, header_value, context.subdomain())
            })
            .min_by(|a, b| {
                (a.priority, a.created_at, a.id.as_str())
                    .cmp(&(b.priority, b.created_at, b.id.as_str()))
            })
            .cloned()
            .ok_or_else(|| GatewayError::no_eligible_provider(context.tenant.as_str()))?;

        debug!(
            tenant = %context.tenant,
            provider = %selected.id,
            priority = selected.priority,
            "provider selected"
        );
        Ok(selected)
    }
}
