//! # Gateway Telemetry
//!
//! Observability for the LLM gateway.
//!
//! This crate provides:
//! - `tracing` subscriber setup shared by the binary and tests
//! - The Prometheus registry served at `/metrics`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LoggingConfig, LoggingError};
pub use metrics::{Metrics, MetricsConfig, MetricsError, RequestMetrics};
