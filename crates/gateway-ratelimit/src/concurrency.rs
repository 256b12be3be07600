//! Per-tenant concurrency gate.
//!
//! Slots are granted up to `max_concurrent`; callers beyond that wait in
//! a queue bounded by `queue_depth`. A zero depth rejects immediately,
//! and queued callers give up after `queue_timeout`.

use dashmap::DashMap;
use gateway_core::error::{GatewayError, GatewayResult};
use gateway_core::types::TenantId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::limits::ConcurrencyLimit;

/// An in-flight slot. The slot is released when the permit drops.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
struct TenantGate {
    semaphore: Arc<Semaphore>,
    waiting: AtomicU32,
    limit: ConcurrencyLimit,
}

impl TenantGate {
    fn new(limit: ConcurrencyLimit) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit.max_concurrent as usize)),
            waiting: AtomicU32::new(0),
            limit,
        }
    }

    fn try_enter_queue(&self) -> bool {
        self.waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.limit.queue_depth).then_some(current + 1)
            })
            .is_ok()
    }

    fn leave_queue(&self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Caps simultaneous in-flight requests per tenant.
#[derive(Debug, Default)]
pub struct ConcurrencyLimiter {
    gates: DashMap<String, Arc<TenantGate>>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with no gates; gates materialize per tenant on
    /// first acquisition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires an in-flight slot for the tenant.
    ///
    /// # Errors
    ///
    /// Returns a rate limit rejection when the tenant is at capacity and
    /// the wait queue is full, or when a queued wait times out.
    pub async fn acquire(
        &self,
        tenant: &TenantId,
        limit: &ConcurrencyLimit,
    ) -> GatewayResult<ConcurrencyPermit> {
        let gate = self.gate_for(tenant, limit);

        if let Ok(permit) = Arc::clone(&gate.semaphore).try_acquire_owned() {
            return Ok(ConcurrencyPermit { _permit: permit });
        }

        if gate.limit.queue_depth == 0 || !gate.try_enter_queue() {
            warn!(
                tenant = %tenant,
                max_concurrent = gate.limit.max_concurrent,
                "concurrency limit reached, rejecting request"
            );
            return Err(reject(tenant, &gate.limit));
        }

        let waited =
            tokio::time::timeout(gate.limit.queue_timeout, Arc::clone(&gate.semaphore).acquire_owned())
                .await;
        gate.leave_queue();

        match waited {
            Ok(Ok(permit)) => Ok(ConcurrencyPermit { _permit: permit }),
            Ok(Err(_)) => Err(GatewayError::internal("concurrency gate closed".to_string())),
            Err(_) => {
                warn!(
                    tenant = %tenant,
                    timeout_ms = gate.limit.queue_timeout.as_millis() as u64,
                    "timed out waiting for a concurrency slot"
                );
                Err(reject(tenant, &gate.limit))
            }
        }
    }

    /// In-flight request count for a tenant, zero when no gate exists.
    #[must_use]
    pub fn in_flight(&self, tenant: &TenantId) -> u32 {
        self.gates.get(tenant.as_str()).map_or(0, |gate| {
            let available = gate.semaphore.available_permits() as u32;
            gate.limit.max_concurrent.saturating_sub(available)
        })
    }

    fn gate_for(&self, tenant: &TenantId, limit: &ConcurrencyLimit) -> Arc<TenantGate> {
        if let Some(existing) = self.gates.get(tenant.as_str()) {
            if existing.limit == *limit {
                return Arc::clone(&existing);
            }
        }

        // Configured bounds changed; replace the gate. Slots held on the
        // old gate drain with it.
        let gate = Arc::new(TenantGate::new(limit.clone()));
        self.gates
            .insert(tenant.as_str().to_string(), Arc::clone(&gate));
        gate
    }
}

fn reject(tenant: &TenantId, limit: &ConcurrencyLimit) -> GatewayError {
    GatewayError::rate_limited(
        "concurrency",
        format!(
            "tenant {tenant} already has {} requests in flight",
            limit.max_concurrent
        ),
        u64::from(limit.max_concurrent),
        Duration::from_secs(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(max_concurrent: u32, queue_depth: u32) -> ConcurrencyLimit {
        ConcurrencyLimit {
            max_concurrent,
            queue_depth,
            queue_timeout: Duration::from_millis(50),
        }
    }

    fn tenant() -> TenantId {
        TenantId::default_tenant()
    }

    #[tokio::test]
    async fn zero_queue_depth_rejects_at_capacity() {
        let limiter = ConcurrencyLimiter::new();
        let bounds = limit(1, 0);

        let held = limiter.acquire(&tenant(), &bounds).await.expect("first slot");
        let rejected = limiter.acquire(&tenant(), &bounds).await;
        match rejected {
            Err(GatewayError::RateLimited { dimension, .. }) => {
                assert_eq!(dimension, "concurrency");
            }
            other => panic!("expected rate limit rejection, got {other:?}"),
        }

        drop(held);
        limiter
            .acquire(&tenant(), &bounds)
            .await
            .expect("slot after release");
    }

    #[tokio::test(start_paused = true)]
    async fn queued_caller_gets_released_slot() {
        let limiter = Arc::new(ConcurrencyLimiter::new());
        let bounds = limit(1, 1);

        let held = limiter.acquire(&tenant(), &bounds).await.expect("first slot");

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let bounds = bounds.clone();
            tokio::spawn(async move { limiter.acquire(&tenant(), &bounds).await })
        };

        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(held);

        let queued = waiter.await.expect("waiter task");
        assert!(queued.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_extra_callers() {
        let limiter = Arc::new(ConcurrencyLimiter::new());
        let bounds = limit(1, 1);

        let _held = limiter.acquire(&tenant(), &bounds).await.expect("first slot");

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let bounds = bounds.clone();
            tokio::spawn(async move { limiter.acquire(&tenant(), &bounds).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let overflow = limiter.acquire(&tenant(), &bounds).await;
        assert!(matches!(
            overflow,
            Err(GatewayError::RateLimited { .. })
        ));

        // The queued caller eventually times out since the slot is never freed.
        let queued = waiter.await.expect("waiter task");
        assert!(queued.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_wait_times_out() {
        let limiter = ConcurrencyLimiter::new();
        let bounds = limit(1, 1);

        let _held = limiter.acquire(&tenant(), &bounds).await.expect("first slot");

        let started = tokio::time::Instant::now();
        let timed_out = limiter.acquire(&tenant(), &bounds).await;
        assert!(timed_out.is_err());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn changed_bounds_rebuild_the_gate() {
        let limiter = ConcurrencyLimiter::new();

        let _held = limiter
            .acquire(&tenant(), &limit(1, 0))
            .await
            .expect("slot on the old gate");

        limiter
            .acquire(&tenant(), &limit(2, 0))
            .await
            .expect("slot on the rebuilt gate");
    }

    #[tokio::test]
    async fn in_flight_tracks_held_permits() {
        let limiter = ConcurrencyLimiter::new();
        let bounds = limit(3, 0);

        assert_eq!(limiter.in_flight(&tenant()), 0);
        let first = limiter.acquire(&tenant(), &bounds).await.expect("slot");
        let _second = limiter.acquire(&tenant(), &bounds).await.expect("slot");
        assert_eq!(limiter.in_flight(&tenant()), 2);

        drop(first);
        assert_eq!(limiter.in_flight(&tenant()), 1);
    }
}
