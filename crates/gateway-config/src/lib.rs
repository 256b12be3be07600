//! Configuration for the LLM gateway.
//!
//! The top-level [`GatewayConfig`] composes the section types owned by the
//! subsystem crates: provider specs from `gateway-core`, tenant limits from
//! `gateway-ratelimit`, circuit breaker and retry settings from
//! `gateway-resilience`, and logging settings from `gateway-telemetry`.
//! Files may be YAML or TOML; a handful of `GATEWAY_*` environment
//! variables override the file on top.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loader;
pub mod model;

pub use loader::{ConfigError, CONFIG_PATH_VAR};
pub use model::{GatewayConfig, RateLimitConfig, ResilienceConfig, ServerConfig};
