//! OpenAI chat-completions client.
//!
//! Speaks the `/chat/completions`, `/embeddings` and `/models` endpoints
//! of api.openai.com and of any OpenAI-compatible server, which is how
//! custom providers are dispatched.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use gateway_core::{
    ChatRequest, ChatResponse, ChatStream, Embedding, EmbeddingRequest, EmbeddingResponse,
    FinishReason, GatewayError, GatewayResult, LLMProvider, ModelInfo, ProviderId, ProviderKind,
    ProviderSpec, TokenUsage,
};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Client for OpenAI and OpenAI-compatible upstreams
pub struct OpenAiClient {
    id: ProviderId,
    kind: ProviderKind,
    base_url: String,
    api_key: Option<SecretString>,
    client: Client,
    timeout: Duration,
}

impl OpenAiClient {
    /// Create a client from a provider spec.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed from the
    /// spec's headers and timeout.
    pub fn new(spec: &ProviderSpec, api_key: Option<SecretString>) -> GatewayResult<Self> {
        Ok(Self {
            id: spec.id.clone(),
            kind: spec.kind,
            base_url: spec.base_url.trim_end_matches('/').to_string(),
            api_key,
            client: crate::factory::build_http_client(spec)?,
            timeout: spec.timeout,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn transform_request(&self, request: &ChatRequest, stream: bool) -> WireChatRequest {
        WireChatRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|message| WireMessage {
                    role: message.role.as_str(),
                    content: message.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: request.stop.clone(),
            seed: request.seed,
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
            n: request.n,
            stream,
            user: request.user.clone(),
        }
    }

    fn transform_response(
        &self,
        wire: WireChatResponse,
        fallback_model: &str,
    ) -> GatewayResult<ChatResponse> {
        let choice = wire.choices.into_iter().next().ok_or_else(|| {
            GatewayError::upstream_decode(self.id.as_str(), "no choices in response")
        })?;

        Ok(ChatResponse {
            id: wire.id.unwrap_or_default(),
            model: wire.model.unwrap_or_else(|| fallback_model.to_string()),
            created: wire.created.unwrap_or_else(|| Utc::now().timestamp()),
            content: choice
                .message
                .and_then(|message| message.content)
                .unwrap_or_default(),
            finish_reason: choice.finish_reason.as_deref().map(map_finish_reason),
            usage: wire.usage.map(WireUsage::into_usage),
            stream_index: None,
            duration: None,
        })
    }

    fn map_send_error(&self, err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::timeout(self.id.as_str(), self.timeout)
        } else {
            GatewayError::connection(self.id.as_str(), err.to_string())
        }
    }

    fn parse_error(&self, status: u16, body: &str) -> GatewayError {
        #[derive(Deserialize)]
        struct WireError {
            error: WireErrorDetail,
        }

        #[derive(Deserialize)]
        struct WireErrorDetail {
            message: String,
        }

        let message = serde_json::from_str::<WireError>(body)
            .map_or_else(|_| format!("HTTP {status}: {body}"), |e| e.error.message);
        GatewayError::provider_status(self.id.as_str(), status, message)
    }
}

#[async_trait]
impl LLMProvider for OpenAiClient {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn chat(&self, request: &ChatRequest) -> GatewayResult<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let wire = self.transform_request(request, false);

        debug!(provider = %self.id, model = %request.model, "sending chat completion");

        let response = self
            .authorize(self.client.post(&url))
            .json(&wire)
            .send()
            .await
            .map_err(|err| {
                error!(provider = %self.id, error = %err, "chat completion request failed");
                self.map_send_error(&err)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            GatewayError::upstream_decode(self.id.as_str(), format!("failed to read body: {err}"))
        })?;

        if !status.is_success() {
            return Err(self.parse_error(status.as_u16(), &body));
        }

        let wire: WireChatResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::upstream_decode(self.id.as_str(), err.to_string()))?;
        self.transform_response(wire, &request.model)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> GatewayResult<ChatStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let wire = self.transform_request(request, true);
        let model = request.model.clone();
        let provider = self.id.as_str().to_string();

        debug!(provider = %self.id, model = %model, "sending streaming chat completion");

        let response = self
            .authorize(self.client.post(&url))
            .json(&wire)
            .send()
            .await
            .map_err(|err| {
                error!(provider = %self.id, error = %err, "streaming request failed");
                self.map_send_error(&err)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &body));
        }

        let stream = try_stream! {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut index: u32 = 0;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result.map_err(|err| {
                    GatewayError::connection(provider.clone(), format!("stream error: {err}"))
                })?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for line in event.lines() {
                        if let Some(data) = line.strip_prefix("data: ") {
                            if data == "[DONE]" {
                                return;
                            }

                            if let Ok(wire) = serde_json::from_str::<WireStreamChunk>(data) {
                                let usage = wire.usage.map(WireUsage::into_usage);
                                if let Some(choice) = wire.choices.into_iter().next() {
                                    let content = choice
                                        .delta
                                        .and_then(|delta| delta.content)
                                        .unwrap_or_default();
                                    let finish_reason =
                                        choice.finish_reason.as_deref().map(map_finish_reason);
                                    if content.is_empty() && finish_reason.is_none() {
                                        continue;
                                    }

                                    let chunk = ChatResponse {
                                        id: wire.id.unwrap_or_default(),
                                        model: wire.model.clone().unwrap_or_else(|| model.clone()),
                                        created: wire
                                            .created
                                            .unwrap_or_else(|| Utc::now().timestamp()),
                                        content,
                                        finish_reason,
                                        usage,
                                        stream_index: Some(index),
                                        duration: None,
                                    };
                                    index += 1;
                                    yield chunk;
                                }
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embed(&self, request: &EmbeddingRequest) -> GatewayResult<EmbeddingResponse> {
        let url = format!("{}/embeddings", self.base_url);
        let wire = WireEmbeddingRequest {
            model: request.model.clone(),
            input: request.inputs.clone(),
            dimensions: request.dimensions,
        };

        debug!(provider = %self.id, model = %request.model, "sending embeddings request");

        let response = self
            .authorize(self.client.post(&url))
            .json(&wire)
            .send()
            .await
            .map_err(|err| self.map_send_error(&err))?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            GatewayError::upstream_decode(self.id.as_str(), format!("failed to read body: {err}"))
        })?;

        if !status.is_success() {
            return Err(self.parse_error(status.as_u16(), &body));
        }

        let wire: WireEmbeddingResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::upstream_decode(self.id.as_str(), err.to_string()))?;

        Ok(EmbeddingResponse {
            model: wire.model.unwrap_or_else(|| request.model.clone()),
            embeddings: wire
                .data
                .into_iter()
                .map(|entry| Embedding {
                    index: entry.index,
                    vector: entry.embedding,
                })
                .collect(),
            usage: wire
                .usage
                .map(|usage| TokenUsage::new(usage.prompt_tokens, 0)),
        })
    }

    async fn list_models(&self) -> GatewayResult<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|err| self.map_send_error(&err))?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            GatewayError::upstream_decode(self.id.as_str(), format!("failed to read body: {err}"))
        })?;

        if !status.is_success() {
            return Err(self.parse_error(status.as_u16(), &body));
        }

        let wire: WireModelsResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::upstream_decode(self.id.as_str(), err.to_string()))?;

        Ok(wire
            .data
            .into_iter()
            .map(|model| ModelInfo {
                id: model.id,
                owned_by: model.owned_by.unwrap_or_else(|| "openai".to_string()),
                created: model.created,
            })
            .collect())
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

// OpenAI wire types

#[derive(Debug, Serialize)]
struct WireChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    id: Option<String>,
    model: Option<String>,
    created: Option<i64>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: Option<WireResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    id: Option<String>,
    model: Option<String>,
    created: Option<i64>,
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: Option<WireDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl WireUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens)
    }
}

#[derive(Debug, Serialize)]
struct WireEmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingResponse {
    model: Option<String>,
    data: Vec<WireEmbeddingData>,
    usage: Option<WireEmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingData {
    index: u32,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingUsage {
    #[serde(default)]
    prompt_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireModelsResponse {
    data: Vec<WireModel>,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    id: String,
    created: Option<i64>,
    owned_by: Option<String>,
}
