//! Anthropic messages client.
//!
//! Speaks the `/messages` endpoint of api.anthropic.com. Authentication
//! uses the `x-api-key` header plus a pinned `anthropic-version`.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use gateway_core::{
    ChatRequest, ChatResponse, ChatStream, EmbeddingRequest, EmbeddingResponse, FinishReason,
    GatewayError, GatewayResult, LLMProvider, ModelInfo, ProviderId, ProviderKind, ProviderSpec,
    Role, TokenUsage,
};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Upper bound Anthropic requires on every request; applied when the
/// caller does not set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Client for Anthropic upstreams
pub struct AnthropicClient {
    id: ProviderId,
    base_url: String,
    api_key: Option<SecretString>,
    client: Client,
    timeout: Duration,
}

impl AnthropicClient {
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
        let builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key.expose_secret()),
            None => builder,
        }
    }

    fn transform_request(&self, request: &ChatRequest, stream: bool) -> WireMessagesRequest {
        let mut system = None;
        let mut messages = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            if message.role == Role::System {
                system = Some(message.content.clone());
            } else {
                messages.push(WireMessage {
                    role: if message.role == Role::User {
                        "user"
                    } else {
                        "assistant"
                    },
                    content: message.content.clone(),
                });
            }
        }

        WireMessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            stop_sequences: request.stop.clone(),
            metadata: request
                .user
                .clone()
                .map(|user_id| WireMetadata { user_id }),
            stream,
        }
    }

    fn transform_response(
        &self,
        wire: WireMessagesResponse,
        fallback_model: &str,
    ) -> ChatResponse {
        let content = wire
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        ChatResponse {
            id: wire.id.unwrap_or_default(),
            model: wire.model.unwrap_or_else(|| fallback_model.to_string()),
            created: Utc::now().timestamp(),
            content,
            finish_reason: wire.stop_reason.as_deref().map(map_stop_reason),
            usage: wire
                .usage
                .map(|usage| TokenUsage::new(usage.input_tokens, usage.output_tokens)),
            stream_index: None,
            duration: None,
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
impl LLMProvider for AnthropicClient {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn chat(&self, request: &ChatRequest) -> GatewayResult<ChatResponse> {
        let url = format!("{}/messages", self.base_url);
        let wire = self.transform_request(request, false);

        debug!(provider = %self.id, model = %request.model, "sending messages request");

        let response = self
            .authorize(self.client.post(&url))
            .json(&wire)
            .send()
            .await
            .map_err(|err| {
                error!(provider = %self.id, error = %err, "messages request failed");
                self.map_send_error(&err)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            GatewayError::upstream_decode(self.id.as_str(), format!("failed to read body: {err}"))
        })?;

        if !status.is_success() {
            return Err(self.parse_error(status.as_u16(), &body));
        }

        let wire: WireMessagesResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::upstream_decode(self.id.as_str(), err.to_string()))?;
        Ok(self.transform_response(wire, &request.model))
    }

    async fn chat_stream(&self, request: &ChatRequest) -> GatewayResult<ChatStream> {
        let url = format!("{}/messages", self.base_url);
        let wire = self.transform_request(request, true);
        let model = request.model.clone();
        let provider = self.id.as_str().to_string();

        debug!(provider = %self.id, model = %model, "sending streaming messages request");

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
            let mut message_id = String::new();
            let mut input_tokens: u32 = 0;

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
                            if let Ok(event) = serde_json::from_str::<WireStreamEvent>(data) {
                                match event.kind.as_str() {
                                    "message_start" => {
                                        if let Some(message) = event.message {
                                            message_id = message.id.unwrap_or_default();
                                            input_tokens = message
                                                .usage
                                                .map_or(0, |usage| usage.input_tokens);
                                        }
                                    }
                                    "content_block_delta" => {
                                        if let Some(text) =
                                            event.delta.and_then(|delta| delta.text)
                                        {
                                            let chunk = ChatResponse::chunk(
                                                message_id.clone(),
                                                model.clone(),
                                                text,
                                                index,
                                            );
                                            index += 1;
                                            yield chunk;
                                        }
                                    }
                                    "message_delta" => {
                                        let finish_reason = event
                                            .delta
                                            .and_then(|delta| delta.stop_reason)
                                            .as_deref()
                                            .map_or(FinishReason::Stop, map_stop_reason);
                                        let usage = event.usage.map(|usage| {
                                            TokenUsage::new(input_tokens, usage.output_tokens)
                                        });
                                        let chunk = ChatResponse::terminal_chunk(
                                            message_id.clone(),
                                            model.clone(),
                                            index,
                                            finish_reason,
                                            usage,
                                        );
                                        index += 1;
                                        yield chunk;
                                    }
                                    "message_stop" => return,
                                    _ => {}
                                }
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embed(&self, _request: &EmbeddingRequest) -> GatewayResult<EmbeddingResponse> {
        Err(GatewayError::validation(
            "anthropic providers do not support embeddings",
            None,
            "unsupported_operation",
        ))
    }

    async fn list_models(&self) -> GatewayResult<Vec<ModelInfo>> {
        // No listing endpoint upstream; serve the known model families.
        Ok(vec![
            ModelInfo::new("claude-opus-4-20250514", "anthropic"),
            ModelInfo::new("claude-sonnet-4-20250514", "anthropic"),
            ModelInfo::new("claude-3-5-haiku-20241022", "anthropic"),
        ])
    }
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

// Anthropic wire types

#[derive(Debug, Serialize)]
struct WireMessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<WireMetadata>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireMetadata {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct WireMessagesResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    content: Vec<WireContentBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<WireStartMessage>,
    #[serde(default)]
    delta: Option<WireEventDelta>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStartMessage {
    id: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireEventDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{ChatMessage, RoutingStrategy, TenantId};
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec(base_url: &str) -> ProviderSpec {
        ProviderSpec {
            id: ProviderId::new("anthropic-main").expect("valid id"),
            tenant: TenantId::default_tenant(),
            kind: ProviderKind::Anthropic,
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
            .model("claude-sonnet-4-20250514")
            .message(ChatMessage::system("Be terse."))
            .message(ChatMessage::user("Hello"))
            .build()
            .expect("valid request")
    }

    #[test]
    fn system_message_moves_to_top_level() {
        let client = AnthropicClient::new(&spec("http://localhost"), None).expect("client builds");
        let wire = client.transform_request(&request(), false);

        assert_eq!(wire.system.as_deref(), Some("Be terse."));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "user");
    }

    #[test]
    fn max_tokens_defaults_when_unset() {
        let client = AnthropicClient::new(&spec("http://localhost"), None).expect("client builds");
        let wire = client.transform_request(&request(), false);
        assert_eq!(wire.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn maps_stop_reasons() {
        assert_eq!(map_stop_reason("end_turn"), FinishReason::Stop);
        assert_eq!(map_stop_reason("stop_sequence"), FinishReason::Stop);
        assert_eq!(map_stop_reason("max_tokens"), FinishReason::Length);
        assert_eq!(map_stop_reason("tool_use"), FinishReason::ToolCalls);
    }

    #[tokio::test]
    async fn chat_round_trip_sends_version_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(header("x-api-key", "sk-ant-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_01",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": "Hi."}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 12, "output_tokens": 2}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(
            &spec(&format!("{}/v1", server.uri())),
            Some(SecretString::new("sk-ant-test".to_string())),
        )
        .expect("client builds");

        let response = client.chat(&request()).await.expect("chat succeeds");
        assert_eq!(response.id, "msg_01");
        assert_eq!(response.content, "Hi.");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.expect("usage").prompt_tokens, 12);
    }

    #[tokio::test]
    async fn stream_assembles_deltas_and_terminal_chunk() {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_01\",\"usage\":{\"input_tokens\":9,\"output_tokens\":1}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(&spec(&format!("{}/v1", server.uri())), None)
            .expect("client builds");

        let mut stream = client.chat_stream(&request()).await.expect("stream opens");
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.expect("chunk ok"));
        }

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "Hel");
        assert_eq!(chunks[0].id, "msg_01");
        assert!(chunks[2].is_terminal());
        let usage = chunks[2].usage.expect("usage");
        assert_eq!(usage.prompt_tokens, 9);
        assert_eq!(usage.completion_tokens, 5);
    }

    #[tokio::test]
    async fn upstream_error_envelope_is_unwrapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(&spec(&format!("{}/v1", server.uri())), None)
            .expect("client builds");

        let err = client.chat(&request()).await.expect_err("should fail");
        match err {
            GatewayError::Provider { status, message, .. } => {
                assert_eq!(status, 529);
                assert_eq!(message, "Overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn embeddings_are_rejected() {
        let client = AnthropicClient::new(&spec("http://localhost"), None).expect("client builds");
        let err = client
            .embed(&EmbeddingRequest::new("claude", vec!["x".to_string()]))
            .await
            .expect_err("should reject");
        assert!(matches!(err, GatewayError::Validation { .. }));
    }
}
