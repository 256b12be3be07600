//! Ollama client for local model servers.
//!
//! Speaks the native Ollama API: `/api/chat` with NDJSON streaming,
//! `/api/embeddings` one input at a time, and `/api/tags` for the model
//! inventory. Authentication is optional; a configured key is sent as a
//! bearer token.

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
use uuid::Uuid;

/// Client for Ollama upstreams
pub struct OllamaClient {
    id: ProviderId,
    base_url: String,
    api_key: Option<SecretString>,
    client: Client,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a client from a provider spec.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed from the
    /// spec's headers and timeout.
    pub fn new(spec: &ProviderSpec, api_key: Option<SecretString>) -> GatewayResult<Self> {
        Ok(Self {
            id: spec.id.clone(),
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
        let options = WireOptions {
            temperature: request.temperature,
            top_k: request.top_k,
            top_p: request.top_p,
            num_predict: request.max_tokens,
            stop: request.stop.clone(),
            seed: request.seed,
        };

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
            options: if options.is_empty() { None } else { Some(options) },
            stream,
        }
    }

    fn transform_response(&self, wire: WireChatResponse, fallback_model: &str) -> ChatResponse {
        let usage = wire.usage();

        ChatResponse {
            id: Uuid::new_v4().to_string(),
            model: wire.model.unwrap_or_else(|| fallback_model.to_string()),
            created: Utc::now().timestamp(),
            content: wire.message.and_then(|m| m.content).unwrap_or_default(),
            finish_reason: Some(map_done_reason(wire.done_reason.as_deref())),
            usage,
            stream_index: None,
            duration: wire.total_duration.map(Duration::from_nanos),
        }
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
            error: String,
        }

        let message = serde_json::from_str::<WireError>(body)
            .map_or_else(|_| format!("HTTP {status}: {body}"), |e| e.error);
        GatewayError::provider_status(self.id.as_str(), status, message)
    }
}

#[async_trait]
impl LLMProvider for OllamaClient {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn chat(&self, request: &ChatRequest) -> GatewayResult<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let wire = self.transform_request(request, false);

        debug!(provider = %self.id, model = %request.model, "sending chat request");

        let response = self
            .authorize(self.client.post(&url))
            .json(&wire)
            .send()
            .await
            .map_err(|err| {
                error!(provider = %self.id, error = %err, "chat request failed");
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
        Ok(self.transform_response(wire, &request.model))
    }

    async fn chat_stream(&self, request: &ChatRequest) -> GatewayResult<ChatStream> {
        let url = format!("{}/api/chat", self.base_url);
        let wire = self.transform_request(request, true);
        let model = request.model.clone();
        let provider = self.id.as_str().to_string();

        debug!(provider = %self.id, model = %model, "sending streaming chat request");

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
            let message_id = Uuid::new_v4().to_string();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result.map_err(|err| {
                    GatewayError::connection(provider.clone(), format!("stream error: {err}"))
                })?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer = buffer[pos + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }

                    let Ok(wire) = serde_json::from_str::<WireChatResponse>(&line) else {
                        continue;
                    };

                    if wire.done {
                        let usage = wire.usage();
                        let duration = wire.total_duration.map(Duration::from_nanos);
                        let content = wire
                            .message
                            .and_then(|m| m.content)
                            .unwrap_or_default();
                        if !content.is_empty() {
                            let chunk = ChatResponse::chunk(
                                message_id.clone(),
                                model.clone(),
                                content,
                                index,
                            );
                            index += 1;
                            yield chunk;
                        }
                        let mut terminal = ChatResponse::terminal_chunk(
                            message_id.clone(),
                            model.clone(),
                            index,
                            map_done_reason(wire.done_reason.as_deref()),
                            usage,
                        );
                        if let Some(duration) = duration {
                            terminal = terminal.with_duration(duration);
                        }
                        yield terminal;
                        return;
                    }

                    let content = wire.message.and_then(|m| m.content).unwrap_or_default();
                    if content.is_empty() {
                        continue;
                    }
                    let chunk =
                        ChatResponse::chunk(message_id.clone(), model.clone(), content, index);
                    index += 1;
                    yield chunk;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embed(&self, request: &EmbeddingRequest) -> GatewayResult<EmbeddingResponse> {
        let url = format!("{}/api/embeddings", self.base_url);
        let mut embeddings = Vec::with_capacity(request.inputs.len());
        let mut estimated_tokens: u32 = 0;

        // One upstream call per input; the endpoint takes a single prompt.
        for (position, input) in request.inputs.iter().enumerate() {
            let wire = WireEmbeddingRequest {
                model: request.model.clone(),
                prompt: input.clone(),
            };

            debug!(provider = %self.id, model = %request.model, position, "sending embedding request");

            let response = self
                .authorize(self.client.post(&url))
                .json(&wire)
                .send()
                .await
                .map_err(|err| {
                    error!(provider = %self.id, error = %err, "embedding request failed");
                    self.map_send_error(&err)
                })?;

            let status = response.status();
            let body = response.text().await.map_err(|err| {
                GatewayError::upstream_decode(
                    self.id.as_str(),
                    format!("failed to read body: {err}"),
                )
            })?;

            if !status.is_success() {
                return Err(self.parse_error(status.as_u16(), &body));
            }

            let wire: WireEmbeddingResponse = serde_json::from_str(&body)
                .map_err(|err| GatewayError::upstream_decode(self.id.as_str(), err.to_string()))?;

            embeddings.push(Embedding {
                index: u32::try_from(position).unwrap_or(u32::MAX),
                vector: wire.embedding,
            });

            // No token counts upstream; estimate from whitespace words.
            let words = u32::try_from(input.split_whitespace().count()).unwrap_or(u32::MAX);
            estimated_tokens = estimated_tokens.saturating_add(words);
        }

        Ok(EmbeddingResponse {
            model: request.model.clone(),
            embeddings,
            usage: Some(TokenUsage::new(estimated_tokens, 0)),
        })
    }

    async fn list_models(&self) -> GatewayResult<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.authorize(self.client.get(&url)).send().await.map_err(|err| {
            error!(provider = %self.id, error = %err, "tags request failed");
            self.map_send_error(&err)
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            GatewayError::upstream_decode(self.id.as_str(), format!("failed to read body: {err}"))
        })?;

        if !status.is_success() {
            return Err(self.parse_error(status.as_u16(), &body));
        }

        let wire: WireTagsResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::upstream_decode(self.id.as_str(), err.to_string()))?;

        Ok(wire
            .models
            .into_iter()
            .map(|model| {
                let created = model
                    .modified_at
                    .as_deref()
                    .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
                    .map(|at| at.timestamp());
                ModelInfo {
                    id: model.name,
                    owned_by: "local".to_string(),
                    created,
                }
            })
            .collect())
    }
}

fn map_done_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

// Ollama wire types

#[derive(Debug, Serialize)]
struct WireChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireOptions>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

impl WireOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_k.is_none()
            && self.top_p.is_none()
            && self.num_predict.is_none()
            && self.stop.is_none()
            && self.seed.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    model: Option<String>,
    message: Option<WireResponseMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    total_duration: Option<u64>,
}

impl WireChatResponse {
    fn usage(&self) -> Option<TokenUsage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(TokenUsage::new(
            self.prompt_eval_count.unwrap_or(0),
            self.eval_count.unwrap_or(0),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct WireTagsResponse {
    #[serde(default)]
    models: Vec<WireTagModel>,
}

#[derive(Debug, Deserialize)]
struct WireTagModel {
    name: String,
    modified_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{ChatMessage, RoutingStrategy, TenantId};
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec(base_url: &str) -> ProviderSpec {
        ProviderSpec {
            id: ProviderId::new("ollama-local").expect("valid id"),
            tenant: TenantId::default_tenant(),
            kind: ProviderKind::Ollama,
            base_url: base_url.to_string(),
            api_key_env: None,
            headers: HashMap::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            priority: 0,
            active: true,
            routing: RoutingStrategy::ByUser,
            created_at: Utc::now(),
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::builder()
            .model("llama3.2")
            .message(ChatMessage::user("Hello"))
            .build()
            .expect("valid request")
    }

    #[test]
    fn options_are_omitted_when_unset() {
        let client = OllamaClient::new(&spec("http://localhost"), None).expect("client builds");
        let wire = client.transform_request(&request(), false);
        assert!(wire.options.is_none());
        assert!(!wire.stream);
    }

    #[test]
    fn options_carry_sampling_parameters() {
        let client = OllamaClient::new(&spec("http://localhost"), None).expect("client builds");
        let mut request = request();
        request.temperature = Some(0.2);
        request.max_tokens = Some(128);
        request.seed = Some(42);

        let wire = client.transform_request(&request, true);
        let options = wire.options.expect("options present");
        assert_eq!(options.num_predict, Some(128));
        assert_eq!(options.seed, Some(42));
        assert!(wire.stream);
    }

    #[test]
    fn maps_done_reasons() {
        assert_eq!(map_done_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(map_done_reason(Some("length")), FinishReason::Length);
        assert_eq!(map_done_reason(None), FinishReason::Stop);
    }

    #[tokio::test]
    async fn chat_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "llama3.2", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.2",
                "created_at": "2024-05-01T12:00:00.000000Z",
                "message": {"role": "assistant", "content": "Hi."},
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 11,
                "eval_count": 3,
                "total_duration": 1_500_000_000u64
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&spec(&server.uri()), None).expect("client builds");
        let response = client.chat(&request()).await.expect("chat succeeds");

        assert_eq!(response.content, "Hi.");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.expect("usage").prompt_tokens, 11);
        assert_eq!(response.duration, Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn stream_parses_ndjson_lines() {
        let body = concat!(
            "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":5,\"eval_count\":2}\n",
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&spec(&server.uri()), None).expect("client builds");
        let mut stream = client.chat_stream(&request()).await.expect("stream opens");

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.expect("chunk ok"));
        }

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "Hel");
        assert_eq!(chunks[1].content, "lo");
        assert!(chunks[2].is_terminal());
        assert_eq!(chunks[2].usage.expect("usage").completion_tokens, 2);
        assert_eq!(chunks[0].stream_index, Some(0));
        assert_eq!(chunks[2].stream_index, Some(2));
    }

    #[tokio::test]
    async fn embeddings_call_once_per_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embedding": [0.5, 0.25]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = OllamaClient::new(&spec(&server.uri()), None).expect("client builds");
        let response = client
            .embed(&EmbeddingRequest::new(
                "nomic-embed-text",
                vec!["one two three".to_string(), "four".to_string()],
            ))
            .await
            .expect("embed succeeds");

        assert_eq!(response.embeddings.len(), 2);
        assert_eq!(response.embeddings[0].index, 0);
        assert_eq!(response.usage.expect("usage").prompt_tokens, 4);
    }

    #[tokio::test]
    async fn tags_map_to_model_infos() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {
                        "name": "llama3.2:latest",
                        "model": "llama3.2:latest",
                        "modified_at": "2024-05-01T12:00:00Z",
                        "size": 2019393189u64,
                        "digest": "sha256:abc123",
                        "details": {"family": "llama", "parameter_size": "3B"}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&spec(&server.uri()), None).expect("client builds");
        let models = client.list_models().await.expect("listing succeeds");

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "llama3.2:latest");
        assert_eq!(models[0].owned_by, "local");
        assert!(models[0].created.is_some());
    }

    #[tokio::test]
    async fn upstream_error_string_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "model 'missing' not found"
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&spec(&server.uri()), None).expect("client builds");
        let err = client.chat(&request()).await.expect_err("should fail");
        match err {
            GatewayError::Provider { status, message, .. } => {
                assert_eq!(status, 404);
                assert_eq!(message, "model 'missing' not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
