//! Health, readiness, and liveness probes.
//!
//! Liveness is unconditional: a responding process is alive. Readiness
//! requires at least one active provider and a reachable rate-limit
//! store. The full health report additionally summarizes circuit
//! breaker state; open circuits degrade the gateway but only a fleet
//! of fully open circuits marks it unhealthy.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use gateway_resilience::CircuitState;
use serde::Serialize;

use crate::state::AppState;

/// Component or overall health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Operational with reduced capacity
    Degraded,
    /// Unable to serve requests
    Unhealthy,
}

impl HealthStatus {
    /// The more severe of two statuses.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }

    fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// One subsystem's contribution to the health report
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Subsystem name
    pub name: &'static str,
    /// Subsystem status
    pub status: HealthStatus,
    /// Human-readable context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status, the worst across components
    pub status: HealthStatus,
    /// Gateway version
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime_seconds: u64,
    /// Per-subsystem breakdown
    pub components: Vec<ComponentHealth>,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let components = vec![
        provider_health(&state).await,
        store_health(&state).await,
        breaker_health(&state),
    ];
    let status = components
        .iter()
        .fold(HealthStatus::Healthy, |overall, component| {
            overall.worst(component.status)
        });

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        components,
    };

    (status.http_status(), Json(body)).into_response()
}

/// `GET /health/ready`
pub async fn readiness(State(state): State<AppState>) -> Response {
    let providers = state.router.registry().snapshot().await.specs().len();
    if providers == 0 {
        return (StatusCode::SERVICE_UNAVAILABLE, "no active providers").into_response();
    }
    if state.limiter.store().health_check().await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "rate limit store unreachable").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}

/// `GET /health/live`
pub async fn liveness() -> &'static str {
    "alive"
}

async fn provider_health(state: &AppState) -> ComponentHealth {
    let count = state.router.registry().snapshot().await.specs().len();
    if count == 0 {
        ComponentHealth {
            name: "providers",
            status: HealthStatus::Degraded,
            detail: Some("no active providers".to_string()),
        }
    } else {
        ComponentHealth {
            name: "providers",
            status: HealthStatus::Healthy,
            detail: Some(format!("{count} active")),
        }
    }
}

async fn store_health(state: &AppState) -> ComponentHealth {
    match state.limiter.store().health_check().await {
        Ok(()) => ComponentHealth {
            name: "rate_limit_store",
            status: HealthStatus::Healthy,
            detail: Some(state.limiter.store().name().to_string()),
        },
        // Admission fails open on store errors, so a dead store degrades
        // rather than kills the gateway.
        Err(error) => ComponentHealth {
            name: "rate_limit_store",
            status: HealthStatus::Degraded,
            detail: Some(error.to_string()),
        },
    }
}

fn breaker_health(state: &AppState) -> ComponentHealth {
    let states = state.policies.states();
    let open = states
        .iter()
        .filter(|(_, circuit)| *circuit == CircuitState::Open)
        .count();

    if open == 0 {
        ComponentHealth {
            name: "circuit_breakers",
            status: HealthStatus::Healthy,
            detail: None,
        }
    } else if open == states.len() {
        ComponentHealth {
            name: "circuit_breakers",
            status: HealthStatus::Unhealthy,
            detail: Some(format!("all {open} circuits open")),
        }
    } else {
        ComponentHealth {
            name: "circuit_breakers",
            status: HealthStatus::Degraded,
            detail: Some(format!("{open} of {} circuits open", states.len())),
        }
    }
}
