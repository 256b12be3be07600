//! Circuit breaker pattern implementation.
//!
//! The circuit breaker prevents cascading failures by stopping requests
//! to a failing provider and allowing it time to recover. Failures are
//! judged as a ratio over a rolling sample window rather than a plain
//! consecutive count, so a provider with healthy traffic is not opened
//! by a handful of scattered errors.

use gateway_core::GatewayError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, testing if the provider recovered
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl CircuitState {
    /// Label used in logs and metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Callback invoked on every state transition, used to feed telemetry.
pub type TransitionHook = Arc<dyn Fn(&str, CircuitState) + Send + Sync>;

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure ratio within the sampling window that opens the circuit
    pub failure_ratio: f64,
    /// Minimum samples in the window before the ratio is considered
    pub minimum_throughput: u32,
    /// Length of the rolling sample window
    #[serde(with = "humantime_serde")]
    pub sampling_duration: Duration,
    /// Time to stay open before probing the provider again
    #[serde(with = "humantime_serde")]
    pub break_duration: Duration,
    /// Number of concurrent probe calls allowed while half-open
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            minimum_throughput: 10,
            sampling_duration: Duration::from_secs(30),
            break_duration: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

/// Circuit breaker for a single provider
pub struct CircuitBreaker {
    /// Provider identifier
    provider_id: String,
    /// Configuration
    config: CircuitBreakerConfig,
    /// Current state (atomic for lock-free reads)
    state: AtomicU8,
    /// Start of the current sample window (milliseconds since epoch)
    window_started_at: AtomicU64,
    /// Success count in the current window
    success_count: AtomicU32,
    /// Failure count in the current window
    failure_count: AtomicU32,
    /// Timestamp when the circuit opened (milliseconds since epoch)
    opened_at: AtomicU64,
    /// Probe calls currently in flight while half-open
    probes_in_flight: AtomicU32,
    /// Lock serializing state transitions
    transition_lock: Mutex<()>,
    /// Optional transition observer
    hook: Option<TransitionHook>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            window_started_at: AtomicU64::new(now_millis()),
            success_count: AtomicU32::new(0),
            failure_count: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            probes_in_flight: AtomicU32::new(0),
            transition_lock: Mutex::new(()),
            hook: None,
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(provider_id: impl Into<String>) -> Self {
        Self::new(provider_id, CircuitBreakerConfig::default())
    }

    /// Attach a transition observer. Must be called before the breaker is
    /// shared.
    #[must_use]
    pub fn with_hook(mut self, hook: TransitionHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Get the provider ID
    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether a call may proceed.
    ///
    /// # Errors
    /// Returns `GatewayError::CircuitOpen` while the circuit is open or
    /// when all half-open probe slots are taken.
    pub fn check(&self) -> Result<(), GatewayError> {
        match self.state() {
            CircuitState::Closed => {
                self.roll_window_if_elapsed();
                Ok(())
            }
            CircuitState::HalfOpen => self.acquire_probe(),
            CircuitState::Open => {
                let remaining = self.remaining_break();
                if remaining.is_zero() {
                    self.transition_to_half_open();
                    self.acquire_probe()
                } else {
                    Err(GatewayError::circuit_open(&self.provider_id, remaining))
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.roll_window_if_elapsed();
                self.success_count.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                debug!(provider = %self.provider_id, "probe succeeded, closing circuit");
                self.transition_to_closed();
            }
            CircuitState::Open => {
                // Late result from before the circuit opened; ignore.
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.roll_window_if_elapsed();
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                let total = failures + self.success_count.load(Ordering::Relaxed);

                if total >= self.config.minimum_throughput
                    && f64::from(failures) / f64::from(total) >= self.config.failure_ratio
                {
                    debug!(
                        provider = %self.provider_id,
                        failures,
                        total,
                        ratio = self.config.failure_ratio,
                        "failure ratio reached"
                    );
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => {
                debug!(provider = %self.provider_id, "probe failed, reopening circuit");
                self.transition_to_open();
            }
            CircuitState::Open => {
                // Already open, nothing to record.
            }
        }
    }

    /// Time remaining before an open circuit begins probing.
    /// Zero when the circuit is not open or the break has elapsed.
    #[must_use]
    pub fn remaining_break(&self) -> Duration {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        if opened_at == 0 {
            return Duration::ZERO;
        }
        let elapsed = now_millis().saturating_sub(opened_at);
        let break_millis = duration_millis(self.config.break_duration);
        Duration::from_millis(break_millis.saturating_sub(elapsed))
    }

    fn acquire_probe(&self) -> Result<(), GatewayError> {
        let max = self.config.half_open_max_probes.max(1);
        let acquired = self
            .probes_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |probes| {
                (probes < max).then_some(probes + 1)
            })
            .is_ok();

        if acquired {
            Ok(())
        } else {
            // Probe slots taken; tell the caller to come back shortly.
            Err(GatewayError::circuit_open(
                &self.provider_id,
                Duration::from_secs(1),
            ))
        }
    }

    /// Reset the sample window once the sampling duration has elapsed.
    fn roll_window_if_elapsed(&self) {
        let now = now_millis();
        let started = self.window_started_at.load(Ordering::Acquire);
        if now.saturating_sub(started) < duration_millis(self.config.sampling_duration) {
            return;
        }

        // Only the thread that wins the CAS clears the counters.
        if self
            .window_started_at
            .compare_exchange(started, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.success_count.store(0, Ordering::Relaxed);
            self.failure_count.store(0, Ordering::Relaxed);
        }
    }

    fn transition_to_open(&self) {
        let _guard = self.transition_lock.lock();

        let prev = self.state.swap(CircuitState::Open as u8, Ordering::AcqRel);
        if prev != CircuitState::Open as u8 {
            self.opened_at.store(now_millis(), Ordering::Release);
            self.probes_in_flight.store(0, Ordering::Relaxed);

            warn!(provider = %self.provider_id, "circuit breaker opened");
            self.notify(CircuitState::Open);
        }
    }

    fn transition_to_half_open(&self) {
        let _guard = self.transition_lock.lock();

        let moved = self
            .state
            .compare_exchange(
                CircuitState::Open as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if moved {
            self.probes_in_flight.store(0, Ordering::Relaxed);

            info!(provider = %self.provider_id, "circuit breaker half-open, probing");
            self.notify(CircuitState::HalfOpen);
        }
    }

    fn transition_to_closed(&self) {
        let _guard = self.transition_lock.lock();

        let prev = self.state.swap(CircuitState::Closed as u8, Ordering::AcqRel);
        self.success_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.window_started_at.store(now_millis(), Ordering::Release);
        self.opened_at.store(0, Ordering::Release);
        self.probes_in_flight.store(0, Ordering::Relaxed);

        if prev != CircuitState::Closed as u8 {
            info!(provider = %self.provider_id, "circuit breaker closed");
            self.notify(CircuitState::Closed);
        }
    }

    fn notify(&self, state: CircuitState) {
        if let Some(hook) = &self.hook {
            hook(&self.provider_id, state);
        }
    }

    /// Reset the circuit breaker to the closed state
    pub fn reset(&self) {
        self.transition_to_closed();
    }

    /// Force the circuit open (manual intervention)
    pub fn force_open(&self) {
        self.transition_to_open();
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Failure count in the current window
    pub failure_count: u32,
    /// Success count in the current window
    pub success_count: u32,
}

impl CircuitBreakerStats {
    /// Failure rate over the current window
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.failure_count + self.success_count;
        if total == 0 {
            0.0
        } else {
            f64::from(self.failure_count) / f64::from(total)
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
