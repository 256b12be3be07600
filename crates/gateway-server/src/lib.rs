//! # Gateway Server
//!
//! HTTP surface for the LLM gateway.
//!
//! This crate provides:
//! - Axum handlers for the OpenAI, Anthropic, Gemini, and Ollama
//!   dialect endpoints
//! - The streaming coordinator bridging provider chunk streams onto
//!   SSE and NDJSON transports
//! - Health, readiness, and liveness probes plus the metrics endpoint
//! - The server lifecycle with graceful, bounded shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod streaming;

pub use error::ApiError;
pub use health::{ComponentHealth, HealthResponse, HealthStatus};
pub use routes::create_router;
pub use server::{Server, ServerError};
pub use shutdown::shutdown_signal;
pub use state::AppState;
