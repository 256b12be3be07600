//! Provider configuration snapshots.
//!
//! Provider records are managed elsewhere and read-only at request
//! time. The registry loads whole snapshots from a [`ProviderSource`]
//! and swaps them in atomically, so concurrent readers always see a
//! complete provider list, never a partially-refreshed one. Snapshots
//! are reused until a TTL elapses; a failing source keeps the last
//! good snapshot alive.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use gateway_core::error::GatewayResult;
use gateway_core::provider::ProviderSpec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backing store for provider configuration.
#[async_trait]
pub trait ProviderSource: Send + Sync {
    /// Loads the full provider list across all tenants.
    async fn load(&self) -> GatewayResult<Vec<ProviderSpec>>;
}

/// Provider source backed by a fixed list, typically from the config
/// file.
#[derive(Debug, Default)]
pub struct StaticProviderSource {
    specs: Vec<ProviderSpec>,
}

impl StaticProviderSource {
    /// Creates a source serving the given providers.
    #[must_use]
    pub fn new(specs: Vec<ProviderSpec>) -> Self {
        Self { specs }
    }
}

#[async_trait]
impl ProviderSource for StaticProviderSource {
    async fn load(&self) -> GatewayResult<Vec<ProviderSpec>> {
        Ok(self.specs.clone())
    }
}

/// One immutable view of the provider list.
#[derive(Debug)]
pub struct ProviderSnapshot {
    specs: Vec<Arc<ProviderSpec>>,
    fetched_at: Instant,
}

impl ProviderSnapshot {
    fn new(specs: Vec<ProviderSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(Arc::new).collect(),
            fetched_at: Instant::now(),
        }
    }

    /// Providers in this snapshot.
    #[must_use]
    pub fn specs(&self) -> &[Arc<ProviderSpec>] {
        &self.specs
    }

    fn fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// TTL-bounded cache of provider snapshots.
pub struct ProviderRegistry {
    source: Arc<dyn ProviderSource>,
    ttl: Duration,
    snapshot: ArcSwap<ProviderSnapshot>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ProviderRegistry {
    /// Default snapshot TTL; provider edits take effect within a
    /// minute.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    /// Creates a registry and performs the initial load.
    ///
    /// # Errors
    ///
    /// Fails when the source cannot serve the first snapshot; starting
    /// without any provider configuration is not meaningful.
    pub async fn new(source: Arc<dyn ProviderSource>) -> GatewayResult<Self> {
        Self::with_ttl(source, Self::DEFAULT_TTL).await
    }

    /// Creates a registry with a custom snapshot TTL.
    ///
    /// # Errors
    ///
    /// Fails when the source cannot serve the first snapshot.
    pub async fn with_ttl(source: Arc<dyn ProviderSource>, ttl: Duration) -> GatewayResult<Self> {
        let specs = source.load().await?;
        debug!(providers = specs.len(), "initial provider snapshot loaded");
        Ok(Self {
            source,
            ttl,
            snapshot: ArcSwap::from_pointee(ProviderSnapshot::new(specs)),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Current snapshot, refreshed from the source when the TTL has
    /// elapsed. Only one caller refreshes at a time; the rest reuse
    /// its result.
    pub async fn snapshot(&self) -> Arc<ProviderSnapshot> {
        let current = self.snapshot.load_full();
        if current.fresh(self.ttl) {
            return current;
        }

        let _guard = self.refresh_lock.lock().await;
        let current = self.snapshot.load_full();
        if current.fresh(self.ttl) {
            return current;
        }

        match self.source.load().await {
            Ok(specs) => {
                let next = Arc::new(ProviderSnapshot::new(specs));
                self.snapshot.store(Arc::clone(&next));
                debug!(providers = next.specs.len(), "provider snapshot refreshed");
                next
            }
            Err(err) => {
                warn!(error = %err, "provider source unavailable, keeping stale snapshot");
                let stale = Arc::new(ProviderSnapshot {
                    specs: current.specs.clone(),
                    fetched_at: Instant::now(),
                });
                self.snapshot.store(Arc::clone(&stale));
                stale
            }
        }
    }
}
