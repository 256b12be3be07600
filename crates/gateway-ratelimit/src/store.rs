//! Counter store backing the rate limiter.
//!
//! The store owns the admission primitives: every operation is a single
//! atomic check-and-update, never a separate read followed by a write,
//! so concurrent requests cannot both observe "under limit" and slip
//! past it. The in-memory implementation covers single-instance
//! deployments; the trait leaves room for a distributed backend.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;

/// Error types for counter store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend connection error
    #[error("store connection error: {0}")]
    Connection(String),

    /// Operation timeout
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Backend not available
    #[error("store not available: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Count or tokens consumed in the current window/bucket
    pub current: u64,
    /// Configured limit or bucket capacity
    pub limit: u64,
    /// Tokens left in the bucket, or permits left in the window
    pub remaining: u64,
    /// How long to wait before a retry can succeed; set on rejection
    pub retry_after: Option<Duration>,
}

impl LimitDecision {
    fn admitted(current: u64, limit: u64) -> Self {
        Self {
            allowed: true,
            current,
            limit,
            remaining: limit.saturating_sub(current),
            retry_after: None,
        }
    }

    fn rejected(current: u64, limit: u64, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            current,
            limit,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }
}

/// Atomic admission primitives shared by all limiter dimensions
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count a request against a fixed window. Admitted iff the
    /// post-increment count is within the limit.
    async fn check_fixed_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<LimitDecision>;

    /// Take tokens from a bucket refilled per interval. The bucket
    /// starts full at `capacity`.
    async fn check_token_bucket(
        &self,
        key: &str,
        capacity: u64,
        refill_amount: u64,
        refill_interval: Duration,
        tokens_required: u64,
    ) -> StoreResult<LimitDecision>;

    /// Add to a usage aggregate and return the new total. Used for
    /// post-call token accounting.
    async fn increment_usage(&self, key: &str, amount: u64) -> StoreResult<u64>;

    /// Read a usage aggregate; zero when absent.
    async fn get_usage(&self, key: &str) -> StoreResult<u64>;

    /// Check that the backend is reachable
    async fn health_check(&self) -> StoreResult<()>;

    /// Backend name for logs and metrics
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct FixedWindow {
    started_at: u64,
    count: u64,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: u64,
    last_refill: u64,
}

/// In-memory counter store backed by sharded concurrent maps.
///
/// Expired windows are reclaimed lazily on the next access to the same
/// key, so idle keys linger until touched again.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    fixed: DashMap<String, FixedWindow>,
    buckets: DashMap<String, TokenBucket>,
    usage: DashMap<String, u64>,
}

impl MemoryCounterStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn now_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_fixed_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<LimitDecision> {
        let window_ms = duration_millis(window).max(1);
        let now = Self::now_millis();
        let aligned = now - (now % window_ms);

        let mut entry = self.fixed.entry(key.to_string()).or_insert(FixedWindow {
            started_at: aligned,
            count: 0,
        });

        if entry.started_at != aligned {
            entry.started_at = aligned;
            entry.count = 0;
        }

        if entry.count < limit {
            entry.count += 1;
            Ok(LimitDecision::admitted(entry.count, limit))
        } else {
            let retry_after = Duration::from_millis(aligned + window_ms - now);
            Ok(LimitDecision::rejected(entry.count, limit, retry_after))
        }
    }

    async fn check_token_bucket(
        &self,
        key: &str,
        capacity: u64,
        refill_amount: u64,
        refill_interval: Duration,
        tokens_required: u64,
    ) -> StoreResult<LimitDecision> {
        let interval_ms = duration_millis(refill_interval).max(1);
        let now = Self::now_millis();

        let mut entry = self.buckets.entry(key.to_string()).or_insert(TokenBucket {
            tokens: capacity,
            last_refill: now,
        });

        let intervals = now.saturating_sub(entry.last_refill) / interval_ms;
        if intervals > 0 {
            entry.tokens = capacity.min(entry.tokens + intervals.saturating_mul(refill_amount));
            entry.last_refill += intervals * interval_ms;
        }

        if entry.tokens >= tokens_required {
            entry.tokens -= tokens_required;
            Ok(LimitDecision {
                allowed: true,
                current: capacity - entry.tokens,
                limit: capacity,
                remaining: entry.tokens,
                retry_after: None,
            })
        } else if refill_amount == 0 {
            Ok(LimitDecision::rejected(
                capacity - entry.tokens,
                capacity,
                refill_interval,
            ))
        } else {
            let deficit = tokens_required - entry.tokens;
            let intervals_needed = deficit.div_ceil(refill_amount);
            let ready_at = entry.last_refill + intervals_needed.saturating_mul(interval_ms);
            let retry_after = Duration::from_millis(ready_at.saturating_sub(now));
            Ok(LimitDecision::rejected(
                capacity - entry.tokens,
                capacity,
                retry_after,
            ))
        }
    }

    async fn increment_usage(&self, key: &str, amount: u64) -> StoreResult<u64> {
        let mut entry = self.usage.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
        Ok(*entry)
    }

    async fn get_usage(&self, key: &str) -> StoreResult<u64> {
        Ok(self.usage.get(key).map_or(0, |entry| *entry))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_window_admits_up_to_limit() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(60);

        for expected in 1..=5 {
            let decision = store
                .check_fixed_window("ip:1.2.3.4", 5, window)
                .await
                .expect("store ok");
            assert!(decision.allowed);
            assert_eq!(decision.current, expected);
        }

        let rejected = store
            .check_fixed_window("ip:1.2.3.4", 5, window)
            .await
            .expect("store ok");
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.retry_after.expect("retry after") <= window);
    }

    #[tokio::test]
    async fn fixed_window_resets_after_rollover() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_millis(30);

        for _ in 0..3 {
            assert!(store
                .check_fixed_window("k", 3, window)
                .await
                .expect("store ok")
                .allowed);
        }
        assert!(!store
            .check_fixed_window("k", 3, window)
            .await
            .expect("store ok")
            .allowed);

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store
            .check_fixed_window("k", 3, window)
            .await
            .expect("store ok")
            .allowed);
    }

    #[tokio::test]
    async fn token_bucket_starts_full_and_refills() {
        let store = MemoryCounterStore::new();
        let interval = Duration::from_millis(100);

        // Capacity 20, single-token takes: 20 succeed, the 21st fails.
        for _ in 0..20 {
            assert!(store
                .check_token_bucket("k", 20, 10, interval, 1)
                .await
                .expect("store ok")
                .allowed);
        }
        let rejected = store
            .check_token_bucket("k", 20, 10, interval, 1)
            .await
            .expect("store ok");
        assert!(!rejected.allowed);
        assert!(rejected.retry_after.expect("retry after") <= interval);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let refilled = store
            .check_token_bucket("k", 20, 10, interval, 1)
            .await
            .expect("store ok");
        assert!(refilled.allowed);
        assert_eq!(refilled.remaining, 9);
    }

    #[tokio::test]
    async fn token_bucket_rejects_oversized_take_with_wait_hint() {
        let store = MemoryCounterStore::new();

        let first = store
            .check_token_bucket("k", 100, 50, Duration::from_secs(60), 80)
            .await
            .expect("store ok");
        assert!(first.allowed);
        assert_eq!(first.remaining, 20);

        let second = store
            .check_token_bucket("k", 100, 50, Duration::from_secs(60), 80)
            .await
            .expect("store ok");
        assert!(!second.allowed);
        // 60 more tokens needed, 50 per minute: two intervals.
        let retry_after = second.retry_after.expect("retry after");
        assert!(retry_after > Duration::from_secs(60));
        assert!(retry_after <= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn bucket_never_exceeds_capacity() {
        let store = MemoryCounterStore::new();
        let interval = Duration::from_millis(10);

        assert!(store
            .check_token_bucket("k", 5, 100, interval, 5)
            .await
            .expect("store ok")
            .allowed);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let decision = store
            .check_token_bucket("k", 5, 100, interval, 1)
            .await
            .expect("store ok");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn usage_aggregates_accumulate() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.get_usage("usage:t1").await.expect("store ok"), 0);
        assert_eq!(
            store.increment_usage("usage:t1", 120).await.expect("store ok"),
            120
        );
        assert_eq!(
            store.increment_usage("usage:t1", 30).await.expect("store ok"),
            150
        );
        assert_eq!(store.get_usage("usage:t1").await.expect("store ok"), 150);
    }
}
