//! Provider client construction from routing specs.

use crate::anthropic::AnthropicClient;
use crate::gemini::GeminiClient;
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use gateway_core::{GatewayError, GatewayResult, LLMProvider, ProviderKind, ProviderSpec};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::debug;

/// Build the upstream client matching a provider spec.
///
/// Custom providers speak the OpenAI dialect, which is the de facto
/// protocol of self-hosted inference servers.
pub fn build_provider(spec: &ProviderSpec) -> GatewayResult<Arc<dyn LLMProvider>> {
    let api_key = resolve_api_key(spec)?;
    debug!(provider = %spec.id, kind = %spec.kind, "building provider client");

    let provider: Arc<dyn LLMProvider> = match spec.kind {
        ProviderKind::OpenAi | ProviderKind::Custom => Arc::new(OpenAiClient::new(spec, api_key)?),
        ProviderKind::Anthropic => Arc::new(AnthropicClient::new(spec, api_key)?),
        ProviderKind::Gemini => Arc::new(GeminiClient::new(spec, api_key)?),
        ProviderKind::Ollama => Arc::new(OllamaClient::new(spec, api_key)?),
    };
    Ok(provider)
}

/// Resolve the API key from the environment variable named in
/// `api_key_env`.
///
/// A provider without `api_key_env` runs unauthenticated; one that names
/// a missing or empty variable is a configuration error and fails at
/// construction rather than on the first request.
fn resolve_api_key(spec: &ProviderSpec) -> GatewayResult<Option<SecretString>> {
    let Some(var) = spec.api_key_env.as_deref() else {
        return Ok(None);
    };
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(Some(SecretString::new(value))),
        _ => Err(GatewayError::internal(format!(
            "environment variable {var} for provider {} is not set",
            spec.id
        ))),
    }
}

/// Shared HTTP client builder applying the provider's timeout and extra
/// headers.
pub(crate) fn build_http_client(spec: &ProviderSpec) -> GatewayResult<Client> {
    let mut headers = HeaderMap::new();
    for (raw_name, raw_value) in &spec.headers {
        let name = HeaderName::from_bytes(raw_name.as_bytes()).map_err(|err| {
            GatewayError::internal(format!("invalid header name {raw_name}: {err}"))
        })?;
        let value = HeaderValue::from_str(raw_value).map_err(|err| {
            GatewayError::internal(format!("invalid value for header {raw_name}: {err}"))
        })?;
        headers.insert(name, value);
    }

    Client::builder()
        .timeout(spec.timeout)
        .pool_max_idle_per_host(100)
        .default_headers(headers)
        .build()
        .map_err(|err| GatewayError::internal(format!("failed to create HTTP client: {err}")))
}
