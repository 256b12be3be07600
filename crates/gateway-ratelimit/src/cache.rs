//! Cached per-tenant limit lookups.
//!
//! Limit sets come from a [`LimitsSource`] and are cached for a short
//! TTL so the hot path never blocks on the backing store. A failing
//! source degrades to the last cached value, then to built-in defaults.

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::types::TenantId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::limits::TenantLimits;
use crate::store::StoreResult;

/// Backing store for tenant limit sets.
#[async_trait]
pub trait LimitsSource: Send + Sync {
    /// Loads the limit set for a tenant, `None` when the tenant has no
    /// dedicated configuration.
    async fn load(&self, tenant: &TenantId) -> StoreResult<Option<TenantLimits>>;
}

/// Limit source backed by a fixed map, typically from the config file.
#[derive(Debug, Default)]
pub struct StaticLimitsSource {
    overrides: HashMap<String, TenantLimits>,
    fallback: Option<TenantLimits>,
}

impl StaticLimitsSource {
    /// Creates a source from per-tenant overrides keyed by tenant id.
    #[must_use]
    pub fn new(overrides: HashMap<String, TenantLimits>) -> Self {
        Self {
            overrides,
            fallback: None,
        }
    }

    /// Serves `fallback` to tenants without an override instead of the
    /// built-in defaults.
    #[must_use]
    pub fn with_fallback(mut self, fallback: TenantLimits) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl LimitsSource for StaticLimitsSource {
    async fn load(&self, tenant: &TenantId) -> StoreResult<Option<TenantLimits>> {
        Ok(self
            .overrides
            .get(tenant.as_str())
            .or(self.fallback.as_ref())
            .cloned())
    }
}

struct CachedLimits {
    limits: Arc<TenantLimits>,
    fetched_at: Instant,
}

/// TTL cache in front of a [`LimitsSource`].
pub struct LimitsCache {
    source: Arc<dyn LimitsSource>,
    ttl: Duration,
    entries: DashMap<String, CachedLimits>,
}

impl LimitsCache {
    /// Default cache TTL; limit edits take effect within a minute.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    /// Creates a cache over `source` with the default TTL.
    #[must_use]
    pub fn new(source: Arc<dyn LimitsSource>) -> Self {
        Self::with_ttl(source, Self::DEFAULT_TTL)
    }

    /// Creates a cache over `source` expiring entries after `ttl`.
    #[must_use]
    pub fn with_ttl(source: Arc<dyn LimitsSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Resolves the limit set for a tenant.
    ///
    /// Never fails: a source error falls back to the cached value even
    /// when expired, and to [`TenantLimits::default`] when nothing was
    /// ever cached.
    pub async fn get(&self, tenant: &TenantId) -> Arc<TenantLimits> {
        if let Some(entry) = self.entries.get(tenant.as_str()) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Arc::clone(&entry.limits);
            }
        }

        match self.source.load(tenant).await {
            Ok(found) => {
                if found.is_none() {
                    debug!(tenant = %tenant, "no dedicated limits, using defaults");
                }
                let limits = Arc::new(found.unwrap_or_default());
                self.store(tenant, Arc::clone(&limits));
                limits
            }
            Err(err) => {
                let stale = self
                    .entries
                    .get(tenant.as_str())
                    .map(|entry| Arc::clone(&entry.limits));
                warn!(
                    tenant = %tenant,
                    error = %err,
                    stale = stale.is_some(),
                    "limit source unavailable"
                );
                let limits = stale.unwrap_or_else(|| Arc::new(TenantLimits::default()));
                // Re-arm the TTL so a broken source is retried once per
                // period instead of on every request.
                self.store(tenant, Arc::clone(&limits));
                limits
            }
        }
    }

    fn store(&self, tenant: &TenantId, limits: Arc<TenantLimits>) {
        self.entries.insert(
            tenant.as_str().to_string(),
            CachedLimits {
                limits,
                fetched_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        loads: AtomicU32,
        limits: Option<TenantLimits>,
        fail_after: Option<u32>,
    }

    impl CountingSource {
        fn new(limits: Option<TenantLimits>) -> Self {
            Self {
                loads: AtomicU32::new(0),
                limits,
                fail_after: None,
            }
        }

        fn failing_after(limits: TenantLimits, successes: u32) -> Self {
            Self {
                loads: AtomicU32::new(0),
                limits: Some(limits),
                fail_after: Some(successes),
            }
        }

        fn load_count(&self) -> u32 {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LimitsSource for CountingSource {
        async fn load(&self, _tenant: &TenantId) -> StoreResult<Option<TenantLimits>> {
            let seen = self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(threshold) = self.fail_after {
                if seen >= threshold {
                    return Err(StoreError::Unavailable("limit store offline".to_string()));
                }
            }
            Ok(self.limits.clone())
        }
    }

    fn custom_limits() -> TenantLimits {
        let mut limits = TenantLimits::default();
        limits.global.requests_per_minute = 7;
        limits
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let source = Arc::new(CountingSource::new(Some(custom_limits())));
        let cache = LimitsCache::new(Arc::clone(&source) as Arc<dyn LimitsSource>);
        let tenant = TenantId::default_tenant();

        let first = cache.get(&tenant).await;
        let second = cache.get(&tenant).await;

        assert_eq!(first.global.requests_per_minute, 7);
        assert_eq!(second.global.requests_per_minute, 7);
        assert_eq!(source.load_count(), 1);
    }

    #[tokio::test]
    async fn expired_entries_reload() {
        let source = Arc::new(CountingSource::new(Some(custom_limits())));
        let cache = LimitsCache::with_ttl(
            Arc::clone(&source) as Arc<dyn LimitsSource>,
            Duration::from_millis(20),
        );
        let tenant = TenantId::default_tenant();

        cache.get(&tenant).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get(&tenant).await;

        assert_eq!(source.load_count(), 2);
    }

    #[tokio::test]
    async fn unknown_tenant_gets_defaults() {
        let source = Arc::new(CountingSource::new(None));
        let cache = LimitsCache::new(source as Arc<dyn LimitsSource>);

        let limits = cache.get(&TenantId::default_tenant()).await;

        assert_eq!(*limits, TenantLimits::default());
    }

    #[tokio::test]
    async fn static_source_fallback_covers_unknown_tenants() {
        let source = StaticLimitsSource::new(HashMap::new()).with_fallback(custom_limits());
        let cache = LimitsCache::new(Arc::new(source));

        let limits = cache.get(&TenantId::default_tenant()).await;

        assert_eq!(limits.global.requests_per_minute, 7);
    }

    #[tokio::test]
    async fn source_error_serves_stale_value() {
        let source = Arc::new(CountingSource::failing_after(custom_limits(), 1));
        let cache = LimitsCache::with_ttl(
            Arc::clone(&source) as Arc<dyn LimitsSource>,
            Duration::from_millis(20),
        );
        let tenant = TenantId::default_tenant();

        let fresh = cache.get(&tenant).await;
        assert_eq!(fresh.global.requests_per_minute, 7);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let stale = cache.get(&tenant).await;

        assert_eq!(stale.global.requests_per_minute, 7);
        assert_eq!(source.load_count(), 2);
    }

    #[tokio::test]
    async fn source_error_without_cache_falls_to_defaults() {
        let source = Arc::new(CountingSource::failing_after(custom_limits(), 0));
        let cache = LimitsCache::new(source as Arc<dyn LimitsSource>);

        let limits = cache.get(&TenantId::default_tenant()).await;

        assert_eq!(*limits, TenantLimits::default());
    }
}
