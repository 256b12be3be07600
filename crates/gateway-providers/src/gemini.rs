//! Google Gemini client.
//!
//! Speaks the `generateContent` family of endpoints. The API key travels
//! as a `key` query parameter rather than a header, and streaming uses
//! SSE via `alt=sse`.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use gateway_core::{
    ChatRequest, ChatResponse, ChatStream, Embedding, EmbeddingRequest, EmbeddingResponse,
    FinishReason, GatewayError, GatewayResult, LLMProvider, ModelInfo, ProviderId, ProviderKind,
    ProviderSpec, Role, TokenUsage,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Client for Google Gemini upstreams
pub struct GeminiClient {
    id: ProviderId,
    base_url: String,
    api_key: Option<SecretString>,
    client: Client,
    timeout: Duration,
}

impl GeminiClient {
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

    fn action_url(&self, model: &str, action: &str) -> String {
        let key = self
            .api_key
            .as_ref()
            .map(|key| key.expose_secret().clone())
            .unwrap_or_default();
        format!("{}/models/{model}:{action}?key={key}", self.base_url)
    }

    fn transform_request(&self, request: &ChatRequest) -> WireGenerateRequest {
        let mut system_instruction = None;
        let mut contents = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            if message.role == Role::System {
                system_instruction = Some(WireInstruction {
                    parts: vec![WirePart {
                        text: message.content.clone(),
                    }],
                });
            } else {
                contents.push(WireContent {
                    role: if message.role == Role::User {
                        "user"
                    } else {
                        "model"
                    },
                    parts: vec![WirePart {
                        text: message.content.clone(),
                    }],
                });
            }
        }

        let config = WireGenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.clone(),
        };

        WireGenerateRequest {
            contents,
            system_instruction,
            generation_config: if config.is_empty() { None } else { Some(config) },
        }
    }

    fn transform_response(
        &self,
        wire: WireGenerateResponse,
        fallback_model: &str,
    ) -> GatewayResult<ChatResponse> {
        let usage = wire.usage_metadata.map(|meta| {
            TokenUsage::new(meta.prompt_token_count, meta.candidates_token_count)
        });
        let model = wire
            .model_version
            .unwrap_or_else(|| fallback_model.to_string());

        let Some(candidate) = wire.candidates.into_iter().next() else {
            return Err(GatewayError::upstream_decode(
                self.id.as_str(),
                "response contained no candidates",
            ));
        };

        Ok(ChatResponse {
            id: Uuid::new_v4().to_string(),
            model,
            created: Utc::now().timestamp(),
            content: candidate.text(),
            finish_reason: candidate.finish_reason.as_deref().map(map_finish_reason),
            usage,
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
impl LLMProvider for GeminiClient {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn chat(&self, request: &ChatRequest) -> GatewayResult<ChatResponse> {
        let url = self.action_url(&request.model, "generateContent");
        let wire = self.transform_request(request);

        debug!(provider = %self.id, model = %request.model, "sending generateContent request");

        let response = self.client.post(&url).json(&wire).send().await.map_err(|err| {
            error!(provider = %self.id, error = %err, "generateContent request failed");
            self.map_send_error(&err)
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            GatewayError::upstream_decode(self.id.as_str(), format!("failed to read body: {err}"))
        })?;

        if !status.is_success() {
            return Err(self.parse_error(status.as_u16(), &body));
        }

        let wire: WireGenerateResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::upstream_decode(self.id.as_str(), err.to_string()))?;
        self.transform_response(wire, &request.model)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> GatewayResult<ChatStream> {
        let url = format!(
            "{}&alt=sse",
            self.action_url(&request.model, "streamGenerateContent")
        );
        let wire = self.transform_request(request);
        let model = request.model.clone();
        let provider = self.id.as_str().to_string();

        debug!(provider = %self.id, model = %model, "sending streamGenerateContent request");

        let response = self.client.post(&url).json(&wire).send().await.map_err(|err| {
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

                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        let Ok(wire) = serde_json::from_str::<WireGenerateResponse>(data) else {
                            continue;
                        };

                        let usage = wire.usage_metadata.map(|meta| {
                            TokenUsage::new(meta.prompt_token_count, meta.candidates_token_count)
                        });
                        if let Some(candidate) = wire.candidates.into_iter().next() {
                            let text = candidate.text();
                            if !text.is_empty() {
                                let chunk = ChatResponse::chunk(
                                    message_id.clone(),
                                    model.clone(),
                                    text,
                                    index,
                                );
                                index += 1;
                                yield chunk;
                            }
                            if let Some(reason) = candidate.finish_reason.as_deref() {
                                let chunk = ChatResponse::terminal_chunk(
                                    message_id.clone(),
                                    model.clone(),
                                    index,
                                    map_finish_reason(reason),
                                    usage,
                                );
                                index += 1;
                                yield chunk;
                                return;
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embed(&self, request: &EmbeddingRequest) -> GatewayResult<EmbeddingResponse> {
        let url = self.action_url(&request.model, "batchEmbedContents");
        let wire = WireBatchEmbedRequest {
            requests: request
                .inputs
                .iter()
                .map(|input| WireEmbedRequest {
                    model: format!("models/{}", request.model),
                    content: WireInstruction {
                        parts: vec![WirePart {
                            text: input.clone(),
                        }],
                    },
                    output_dimensionality: request.dimensions,
                })
                .collect(),
        };

        debug!(provider = %self.id, model = %request.model, inputs = request.inputs.len(), "sending batchEmbedContents request");

        let response = self.client.post(&url).json(&wire).send().await.map_err(|err| {
            error!(provider = %self.id, error = %err, "embedding request failed");
            self.map_send_error(&err)
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            GatewayError::upstream_decode(self.id.as_str(), format!("failed to read body: {err}"))
        })?;

        if !status.is_success() {
            return Err(self.parse_error(status.as_u16(), &body));
        }

        let wire: WireBatchEmbedResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::upstream_decode(self.id.as_str(), err.to_string()))?;

        let embeddings = wire
            .embeddings
            .into_iter()
            .enumerate()
            .map(|(index, embedding)| Embedding {
                index: u32::try_from(index).unwrap_or(u32::MAX),
                vector: embedding.values,
            })
            .collect();

        Ok(EmbeddingResponse {
            model: request.model.clone(),
            embeddings,
            usage: None,
        })
    }

    async fn list_models(&self) -> GatewayResult<Vec<ModelInfo>> {
        let key = self
            .api_key
            .as_ref()
            .map(|key| key.expose_secret().clone())
            .unwrap_or_default();
        let url = format!("{}/models?key={key}", self.base_url);

        let response = self.client.get(&url).send().await.map_err(|err| {
            error!(provider = %self.id, error = %err, "model listing failed");
            self.map_send_error(&err)
        })?;

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
            .models
            .into_iter()
            .map(|model| {
                let id = model
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&model.name)
                    .to_string();
                ModelInfo::new(id, "google")
            })
            .collect())
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

// Gemini wire types

#[derive(Debug, Serialize)]
struct WireGenerateRequest {
    contents: Vec<WireContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireInstruction>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct WireContent {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
struct WireInstruction {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
struct WirePart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

impl WireGenerationConfig {
    fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.max_output_tokens.is_none()
            && self.stop_sequences.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct WireGenerateResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<WireUsageMetadata>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    content: Option<WireCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

impl WireCandidate {
    fn text(&self) -> String {
        self.content.as_ref().map_or_else(String::new, |content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Debug, Deserialize)]
struct WireResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

#[derive(Debug, Serialize)]
struct WireBatchEmbedRequest {
    requests: Vec<WireEmbedRequest>,
}

#[derive(Debug, Serialize)]
struct WireEmbedRequest {
    model: String,
    content: WireInstruction,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireBatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<WireEmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct WireModelsResponse {
    #[serde(default)]
    models: Vec<WireModel>,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    name: String,
}
