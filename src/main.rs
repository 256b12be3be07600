//! # LLM Gateway
//!
//! Multi-tenant gateway that fronts heterogeneous LLM providers behind
//! OpenAI, Anthropic, Gemini, and Ollama compatible APIs.
//!
//! ## Features
//!
//! - Four inbound dialect surfaces over one canonical request model
//! - Tenant-scoped provider routing with priority failover
//! - Circuit breaker and retry protection per provider
//! - Layered admission control (tenant, API key, endpoint, client IP)
//! - Prometheus metrics and structured logging
//!
//! ## Usage
//!
//! ```bash
//! # Start with built-in defaults
//! llm-gateway
//!
//! # Start with a configuration file
//! GATEWAY_CONFIG=/etc/llm-gateway/config.yaml llm-gateway
//!
//! # Override the listen port
//! GATEWAY_PORT=9000 llm-gateway
//! ```

use gateway_config::GatewayConfig;
use gateway_server::{AppState, Server};
use gateway_telemetry::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Configuration first: it decides the log level and format.
    let config = match GatewayConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_logging(&config.logging) {
        eprintln!("failed to initialize logging: {err}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        providers = config.providers.len(),
        "starting llm gateway"
    );

    if let Err(err) = run(config).await {
        error!(error = %err, "gateway failed");
        std::process::exit(1);
    }
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let state = AppState::builder().config(config).build().await?;
    Server::new(state).run().await?;
    Ok(())
}
