//! Prometheus metrics registry.
//!
//! One [`Metrics`] instance lives in the server state; handlers and the
//! resilience layer feed it, and `/metrics` serves [`Metrics::gather`].

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Metrics registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prefix applied to every metric name
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "gateway".to_string(),
        }
    }
}

/// Metrics construction error
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A metric could not be built or registered
    #[error("failed to register metric: {0}")]
    Registration(String),
}

fn metric_err(err: prometheus::Error) -> MetricsError {
    MetricsError::Registration(err.to_string())
}

/// One finished request, as reported by the server
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    /// Caller-facing dialect name
    pub dialect: &'static str,
    /// Route template, e.g. "/v1/chat/completions"
    pub endpoint: String,
    /// Tenant the request ran under
    pub tenant: String,
    /// Provider that served it, when routing got that far
    pub provider: Option<String>,
    /// HTTP status returned to the caller
    pub status: u16,
    /// End-to-end latency
    pub duration: Duration,
    /// Whether the response was streamed
    pub streaming: bool,
    /// Prompt tokens, when the upstream reported usage
    pub prompt_tokens: Option<u32>,
    /// Completion tokens, when the upstream reported usage
    pub completion_tokens: Option<u32>,
}

/// Metrics collector for the gateway
pub struct Metrics {
    registry: Registry,

    /// Requests by dialect, endpoint, and response status
    pub requests_total: IntCounterVec,
    /// End-to-end request latency
    pub request_duration_seconds: HistogramVec,
    /// Upstream calls by provider and outcome
    pub provider_requests_total: IntCounterVec,
    /// Tokens attributed to tenants, split into prompt and completion
    pub tokens_total: IntCounterVec,
    /// Admission rejections by limit dimension
    pub rate_limit_rejections_total: IntCounterVec,
    /// Circuit breaker transitions by provider and entered state
    pub circuit_transitions_total: IntCounterVec,
    /// Streams currently open to callers
    pub active_streams: IntGauge,
    /// Errors returned to callers by machine-readable code
    pub errors_total: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics instance with its own registry
    ///
    /// # Errors
    /// Returns error if a metric cannot be constructed.
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let ns = config.namespace.as_str();
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total requests served").namespace(ns),
            &["dialect", "endpoint", "status"],
        )
        .map_err(metric_err)?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Request duration in seconds")
                .namespace(ns)
                .buckets(vec![
                    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
                ]),
            &["dialect", "endpoint"],
        )
        .map_err(metric_err)?;

        let provider_requests_total = IntCounterVec::new(
            Opts::new("provider_requests_total", "Upstream calls by provider").namespace(ns),
            &["provider", "outcome"],
        )
        .map_err(metric_err)?;

        let tokens_total = IntCounterVec::new(
            Opts::new("tokens_total", "Tokens consumed per tenant").namespace(ns),
            &["tenant", "kind"],
        )
        .map_err(metric_err)?;

        let rate_limit_rejections_total = IntCounterVec::new(
            Opts::new(
                "rate_limit_rejections_total",
                "Requests rejected by admission control",
            )
            .namespace(ns),
            &["dimension"],
        )
        .map_err(metric_err)?;

        let circuit_transitions_total = IntCounterVec::new(
            Opts::new(
                "circuit_transitions_total",
                "Circuit breaker state transitions",
            )
            .namespace(ns),
            &["provider", "state"],
        )
        .map_err(metric_err)?;

        let active_streams = IntGauge::with_opts(
            Opts::new("active_streams", "Streams currently open to callers").namespace(ns),
        )
        .map_err(metric_err)?;

        let errors_total = IntCounterVec::new(
            Opts::new("errors_total", "Errors returned to callers").namespace(ns),
            &["code"],
        )
        .map_err(metric_err)?;

        registry.register(Box::new(requests_total.clone())).ok();
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .ok();
        registry
            .register(Box::new(provider_requests_total.clone()))
            .ok();
        registry.register(Box::new(tokens_total.clone())).ok();
        registry
            .register(Box::new(rate_limit_rejections_total.clone()))
            .ok();
        registry
            .register(Box::new(circuit_transitions_total.clone()))
            .ok();
        registry.register(Box::new(active_streams.clone())).ok();
        registry.register(Box::new(errors_total.clone())).ok();

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            provider_requests_total,
            tokens_total,
            rate_limit_rejections_total,
            circuit_transitions_total,
            active_streams,
            errors_total,
        })
    }

    /// Record a finished request
    pub fn record_request(&self, request: &RequestMetrics) {
        self.requests_total
            .with_label_values(&[
                request.dialect,
                &request.endpoint,
                &request.status.to_string(),
            ])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[request.dialect, &request.endpoint])
            .observe(request.duration.as_secs_f64());

        if let Some(provider) = &request.provider {
            let outcome = if request.status < 400 {
                "success"
            } else {
                "error"
            };
            self.provider_requests_total
                .with_label_values(&[provider, outcome])
                .inc();
        }

        if let Some(tokens) = request.prompt_tokens {
            self.tokens_total
                .with_label_values(&[&request.tenant, "prompt"])
                .inc_by(u64::from(tokens));
        }
        if let Some(tokens) = request.completion_tokens {
            self.tokens_total
                .with_label_values(&[&request.tenant, "completion"])
                .inc_by(u64::from(tokens));
        }
    }

    /// Record an error response by machine-readable code
    pub fn record_error(&self, code: &str) {
        self.errors_total.with_label_values(&[code]).inc();
    }

    /// Record an admission rejection
    pub fn record_rate_limit_rejection(&self, dimension: &str) {
        self.rate_limit_rejections_total
            .with_label_values(&[dimension])
            .inc();
    }

    /// Record a circuit breaker transition into `state`
    pub fn record_circuit_transition(&self, provider: &str, state: &str) {
        self.circuit_transitions_total
            .with_label_values(&[provider, state])
            .inc();
    }

    /// Mark a stream as opened
    pub fn stream_started(&self) {
        self.active_streams.inc();
    }

    /// Mark a stream as closed
    pub fn stream_ended(&self) {
        self.active_streams.dec();
    }

    /// Export the registry in Prometheus text format
    #[must_use]
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&families, &mut buffer) {
            warn!(error = %err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
