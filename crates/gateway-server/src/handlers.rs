//! HTTP handlers for every dialect surface.
//!
//! Each handler decodes its dialect's wire format into the canonical
//! model, then runs the shared pipeline: rate-limit admission, routing,
//! resilience-wrapped provider call, dialect encoding. Streamed chat
//! hands off to [`crate::streaming`] after the first upstream response.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Uri};
use axum::response::{IntoResponse, Json, Response};
use gateway_core::{
    ChatRequest, EmbeddingRequest, EmbeddingResponse, GatewayError, GatewayResult, ModelInfo,
    ProviderSpec, TenantId, TokenUsage,
};
use gateway_dialects::{anthropic, gemini, ollama, openai, Dialect};
use gateway_ratelimit::{estimate_tokens, Admission, AdmissionRequest};
use gateway_routing::RouteContext;
use gateway_telemetry::RequestMetrics;
use serde_json::Value;
use tracing::instrument;

use crate::error::{apply_rate_limit_headers, ApiError};
use crate::extractors::{ClientIp, OptionalApiKey, RequestId, Tenant};
use crate::state::AppState;
use crate::streaming::{self, StreamContext};

// Canonical endpoint labels. These double as per-endpoint rate-limit
// keys, so they must match the endpoint names in tenant limit configs.
const OPENAI_CHAT: &str = "/v1/chat/completions";
const OPENAI_EMBEDDINGS: &str = "/v1/embeddings";
const OPENAI_MODELS: &str = "/v1/models";
const ANTHROPIC_MESSAGES: &str = "/v1/messages";
const OLLAMA_CHAT: &str = "/api/chat";
const OLLAMA_EMBEDDINGS: &str = "/api/embeddings";
const OLLAMA_TAGS: &str = "/api/tags";
const GEMINI_GENERATE: &str = "/v1beta/generateContent";
const GEMINI_EMBED: &str = "/v1beta/embedContents";
const GEMINI_MODELS: &str = "/v1beta/models";

/// Everything the shared pipeline needs about one inbound request
struct RequestContext {
    state: AppState,
    dialect: Dialect,
    endpoint: &'static str,
    tenant: TenantId,
    api_key_id: Option<String>,
    client_ip: Option<String>,
    request_id: String,
    headers: HeaderMap,
    path: String,
    started: Instant,
}

impl RequestContext {
    #[allow(clippy::too_many_arguments)]
    fn new(
        state: AppState,
        dialect: Dialect,
        endpoint: &'static str,
        tenant: TenantId,
        api_key: &OptionalApiKey,
        client_ip: Option<String>,
        request_id: String,
        headers: HeaderMap,
        path: String,
    ) -> Self {
        Self {
            state,
            dialect,
            endpoint,
            tenant,
            api_key_id: api_key.rate_limit_id(),
            client_ip,
            request_id,
            headers,
            path,
            started: Instant::now(),
        }
    }

    /// Run the admission cascade for this request.
    async fn admit(&self, estimated_tokens: u64) -> GatewayResult<Admission> {
        let mut admission = AdmissionRequest::new(self.tenant.clone(), self.endpoint)
            .with_estimated_tokens(estimated_tokens);
        if let Some(id) = &self.api_key_id {
            admission = admission.with_api_key_id(id.clone());
        }
        if let Some(ip) = &self.client_ip {
            admission = admission.with_client_ip(ip.clone());
        }
        self.state.limiter.admit(&admission).await
    }

    /// Pick a provider for this request's tenant, path, and headers.
    async fn route(&self) -> GatewayResult<Arc<ProviderSpec>> {
        let mut route = RouteContext::new(self.tenant.clone(), self.path.clone());
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                route = route.with_header(name.as_str(), value);
            }
        }
        if let Some(host) = self
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
        {
            route = route.with_host(host);
        }
        self.state.router.route(&route).await
    }

    fn record(&self, provider: Option<&str>, status: u16, usage: Option<TokenUsage>) {
        self.state.metrics.record_request(&RequestMetrics {
            dialect: self.dialect.name(),
            endpoint: self.endpoint.to_string(),
            tenant: self.tenant.as_str().to_string(),
            provider: provider.map(String::from),
            status,
            duration: self.started.elapsed(),
            streaming: false,
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
        });
    }

    fn spawn_usage(&self, total_tokens: u64) {
        if total_tokens == 0 {
            return;
        }
        let limiter = Arc::clone(&self.state.limiter);
        let tenant = self.tenant.clone();
        let endpoint = self.endpoint;
        tokio::spawn(async move {
            limiter.record_usage(&tenant, endpoint, total_tokens).await;
        });
    }

    /// Record the failure and encode it in this request's dialect.
    fn reject(&self, provider: Option<&str>, error: GatewayError) -> Response {
        self.record(provider, error.status_code().as_u16(), None);
        self.state.metrics.record_error(error.error_code());
        if let GatewayError::RateLimited { dimension, .. } = &error {
            self.state.metrics.record_rate_limit_rejection(dimension);
        }
        ApiError::new(self.dialect, error).into_response()
    }

    fn stream_context(
        &self,
        spec: &ProviderSpec,
        request: &ChatRequest,
        admission: Admission,
    ) -> StreamContext {
        StreamContext {
            dialect: self.dialect,
            model: request.model.clone(),
            tenant: self.tenant.clone(),
            endpoint: self.endpoint,
            provider: spec.id.to_string(),
            request_id: self.request_id.clone(),
            started: self.started,
            metrics: Arc::clone(&self.state.metrics),
            limiter: Arc::clone(&self.state.limiter),
            admission: Some(admission),
        }
    }
}

/// Shared chat pipeline, streaming or not.
async fn chat(context: RequestContext, request: ChatRequest) -> Response {
    let estimated = estimate_tokens(request.content_chars());
    let admission = match context.admit(estimated).await {
        Ok(admission) => admission,
        Err(error) => return context.reject(None, error),
    };

    let spec = match context.route().await {
        Ok(spec) => spec,
        Err(error) => return context.reject(None, error),
    };
    let provider = match context.state.provider_for(&spec) {
        Ok(provider) => provider,
        Err(error) => return context.reject(Some(spec.id.as_str()), error),
    };
    let policy = context.state.policies.policy_for(&spec);

    if request.stream {
        match policy.execute(|| provider.chat_stream(&request)).await {
            Ok(upstream) => {
                // The admission rides inside the stream so the
                // concurrency permit outlives the handler; copy the
                // status out for the response headers first.
                let status = admission.status;
                let stream_context = context.stream_context(&spec, &request, admission);
                let mut response = streaming::respond(stream_context, upstream);
                apply_rate_limit_headers(&mut response, status.as_ref());
                response
            }
            Err(error) => context.reject(Some(spec.id.as_str()), error),
        }
    } else {
        match policy.execute(|| provider.chat(&request)).await {
            Ok(response) => {
                let response = response.with_duration(context.started.elapsed());
                let usage = response.usage;
                context.record(Some(spec.id.as_str()), 200, usage);
                context.spawn_usage(usage.map_or(0, |u| u64::from(u.total_tokens)));

                let body = match context.dialect {
                    Dialect::OpenAi => openai::encode_chat_response(&response),
                    Dialect::Anthropic => anthropic::encode_chat_response(&response),
                    Dialect::Gemini => gemini::encode_chat_response(&response),
                    Dialect::Ollama => ollama::encode_chat_response(&response),
                };
                let mut http = Json(body).into_response();
                apply_rate_limit_headers(&mut http, admission.status.as_ref());
                http
            }
            Err(error) => context.reject(Some(spec.id.as_str()), error),
        }
    }
}

/// Shared embedding pipeline.
async fn embedding(
    context: RequestContext,
    request: EmbeddingRequest,
    encode: fn(&EmbeddingResponse) -> Value,
) -> Response {
    let estimated = estimate_tokens(request.content_chars());
    let admission = match context.admit(estimated).await {
        Ok(admission) => admission,
        Err(error) => return context.reject(None, error),
    };

    let spec = match context.route().await {
        Ok(spec) => spec,
        Err(error) => return context.reject(None, error),
    };
    let provider = match context.state.provider_for(&spec) {
        Ok(provider) => provider,
        Err(error) => return context.reject(Some(spec.id.as_str()), error),
    };
    let policy = context.state.policies.policy_for(&spec);

    match policy.execute(|| provider.embed(&request)).await {
        Ok(response) => {
            let usage = response.usage;
            context.record(Some(spec.id.as_str()), 200, usage);
            context.spawn_usage(usage.map_or(0, |u| u64::from(u.total_tokens)));

            let mut http = Json(encode(&response)).into_response();
            apply_rate_limit_headers(&mut http, admission.status.as_ref());
            http
        }
        Err(error) => context.reject(Some(spec.id.as_str()), error),
    }
}

/// Shared model-listing pipeline. Listings skip rate-limit admission;
/// they consume no tokens and carry no billable work.
async fn models(context: RequestContext, encode: fn(&[ModelInfo]) -> Value) -> Response {
    let spec = match context.route().await {
        Ok(spec) => spec,
        Err(error) => return context.reject(None, error),
    };
    let provider = match context.state.provider_for(&spec) {
        Ok(provider) => provider,
        Err(error) => return context.reject(Some(spec.id.as_str()), error),
    };
    let policy = context.state.policies.policy_for(&spec);

    match policy.execute(|| provider.list_models()).await {
        Ok(listing) => {
            context.record(Some(spec.id.as_str()), 200, None);
            Json(encode(&listing)).into_response()
        }
        Err(error) => context.reject(Some(spec.id.as_str()), error),
    }
}

/// `POST /v1/chat/completions`
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn openai_chat(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let context = RequestContext::new(
        state,
        Dialect::OpenAi,
        OPENAI_CHAT,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );
    match openai::decode_chat_request(&body) {
        Ok(request) => chat(context, request).await,
        Err(error) => context.reject(None, error),
    }
}

/// `POST /v1/embeddings`
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn openai_embeddings(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let context = RequestContext::new(
        state,
        Dialect::OpenAi,
        OPENAI_EMBEDDINGS,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );
    match openai::decode_embedding_request(&body) {
        Ok(request) => embedding(context, request, openai::encode_embedding_response).await,
        Err(error) => context.reject(None, error),
    }
}

/// `GET /v1/models`
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn openai_models(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let context = RequestContext::new(
        state,
        Dialect::OpenAi,
        OPENAI_MODELS,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );
    models(context, openai::encode_models_response).await
}

/// `POST /v1/messages`
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn anthropic_messages(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let context = RequestContext::new(
        state,
        Dialect::Anthropic,
        ANTHROPIC_MESSAGES,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );
    match anthropic::decode_chat_request(&body) {
        Ok(request) => chat(context, request).await,
        Err(error) => context.reject(None, error),
    }
}

/// `POST /api/chat`
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn ollama_chat(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let context = RequestContext::new(
        state,
        Dialect::Ollama,
        OLLAMA_CHAT,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );
    match ollama::decode_chat_request(&body) {
        Ok(request) => chat(context, request).await,
        Err(error) => context.reject(None, error),
    }
}

/// `POST /api/embeddings`
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn ollama_embeddings(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let context = RequestContext::new(
        state,
        Dialect::Ollama,
        OLLAMA_EMBEDDINGS,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );
    match ollama::decode_embedding_request(&body) {
        Ok(request) => embedding(context, request, ollama::encode_embedding_response).await,
        Err(error) => context.reject(None, error),
    }
}

/// `GET /api/tags`
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn ollama_tags(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let context = RequestContext::new(
        state,
        Dialect::Ollama,
        OLLAMA_TAGS,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );
    models(context, ollama::encode_models_response).await
}

/// `POST /v1beta/models/{model}:{action}`
///
/// Gemini packs the model and the operation into one path segment, so
/// this handler dispatches on the action suffix.
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn gemini_model_action(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (endpoint, parsed) = match split_model_action(&model_action) {
        Some((model, "generateContent")) => (
            GEMINI_GENERATE,
            Ok(GeminiOperation::Chat {
                model: model.to_string(),
                stream: false,
            }),
        ),
        Some((model, "streamGenerateContent")) => (
            GEMINI_GENERATE,
            Ok(GeminiOperation::Chat {
                model: model.to_string(),
                stream: true,
            }),
        ),
        Some((model, "embedContents")) => (
            GEMINI_EMBED,
            Ok(GeminiOperation::Embed {
                model: model.to_string(),
            }),
        ),
        Some((_, other)) => (
            GEMINI_GENERATE,
            Err(GatewayError::validation(
                format!("unknown model action '{other}'"),
                None,
                "unknown_action",
            )),
        ),
        None => (
            GEMINI_GENERATE,
            Err(GatewayError::validation(
                format!("expected model:action in path, got '{model_action}'"),
                None,
                "invalid_path",
            )),
        ),
    };

    let context = RequestContext::new(
        state,
        Dialect::Gemini,
        endpoint,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );

    match parsed {
        Ok(GeminiOperation::Chat { model, stream }) => {
            match gemini::decode_chat_request(&model, stream, &body) {
                Ok(request) => chat(context, request).await,
                Err(error) => context.reject(None, error),
            }
        }
        Ok(GeminiOperation::Embed { model }) => {
            match gemini::decode_embedding_request(&model, &body) {
                Ok(request) => embedding(context, request, gemini::encode_embedding_response).await,
                Err(error) => context.reject(None, error),
            }
        }
        Err(error) => context.reject(None, error),
    }
}

enum GeminiOperation {
    Chat { model: String, stream: bool },
    Embed { model: String },
}

/// `GET /v1beta/models`
#[instrument(skip_all, fields(tenant = %tenant, request_id = %request_id))]
pub async fn gemini_models(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    api_key: OptionalApiKey,
    RequestId(request_id): RequestId,
    ClientIp(client_ip): ClientIp,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let context = RequestContext::new(
        state,
        Dialect::Gemini,
        GEMINI_MODELS,
        tenant,
        &api_key,
        client_ip,
        request_id,
        headers,
        uri.path().to_string(),
    );
    models(context, gemini::encode_models_response).await
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
        .into_response()
}

fn split_model_action(segment: &str) -> Option<(&str, &str)> {
    let (model, action) = segment.split_once(':')?;
    if model.is_empty() || action.is_empty() {
        return None;
    }
    Some((model, action))
}

#[cfg(test)]
mod tests {
    use super::split_model_action;

    #[test]
    fn splits_gemini_path_segment() {
        assert_eq!(
            split_model_action("gemini-pro:generateContent"),
            Some(("gemini-pro", "generateContent"))
        );
        assert_eq!(
            split_model_action("models/gemini:streamGenerateContent"),
            Some(("models/gemini", "streamGenerateContent"))
        );
    }

    #[test]
    fn rejects_segments_without_an_action() {
        assert_eq!(split_model_action("gemini-pro"), None);
        assert_eq!(split_model_action("gemini-pro:"), None);
        assert_eq!(split_model_action(":generateContent"), None);
    }
}
