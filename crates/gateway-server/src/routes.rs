//! Route table and middleware stack.

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info_span, Span};

use crate::{handlers, health, state::AppState};

/// Create the gateway router with every dialect surface mounted.
///
/// Routes are registered flat rather than nested so handlers see the
/// original request path, which the by-path routing strategy matches
/// against.
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.config.server.request_timeout;
    let max_body_bytes = state.config.server.max_body_bytes;

    Router::new()
        // Probes and metrics
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(handlers::metrics))
        // OpenAI dialect
        .route("/v1/chat/completions", post(handlers::openai_chat))
        .route("/v1/embeddings", post(handlers::openai_embeddings))
        .route("/v1/models", get(handlers::openai_models))
        // Anthropic dialect
        .route("/v1/messages", post(handlers::anthropic_messages))
        // Gemini dialect: the action is part of the final path segment
        .route("/v1beta/models", get(handlers::gemini_models))
        .route(
            "/v1beta/models/:model_action",
            post(handlers::gemini_model_action),
        )
        // Ollama dialect
        .route("/api/chat", post(handlers::ollama_chat))
        .route("/api/embeddings", post(handlers::ollama_embeddings))
        .route("/api/tags", get(handlers::ollama_tags))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(span_for_request))
                .layer(PropagateRequestIdLayer::x_request_id())
                // Bounds time-to-response only; streaming bodies are
                // not cut off once headers have been sent.
                .layer(TimeoutLayer::new(request_timeout))
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}

fn span_for_request(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}
