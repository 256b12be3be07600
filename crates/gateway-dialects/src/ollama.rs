//! Ollama dialect.
//!
//! Decodes `/api/chat` and `/api/embeddings` payloads into the canonical
//! model and encodes canonical responses as Ollama NDJSON objects. Ollama
//! streams by default, so an absent `stream` field means `true`.

use chrono::{DateTime, SecondsFormat, Utc};
use gateway_core::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason,
    GatewayError, GatewayResult, ModelInfo, Role,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::StreamFrame;

const DIALECT: &str = "ollama";

/// Decode an Ollama chat request body.
pub fn decode_chat_request(body: &[u8]) -> GatewayResult<ChatRequest> {
    let wire: WireChatRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::unsupported_payload(DIALECT, err.to_string()))?;

    let messages = wire
        .messages
        .into_iter()
        .map(|message| ChatMessage {
            role: Role::from_wire(&message.role),
            content: message.content,
        })
        .collect();

    let options = wire.options.unwrap_or_default();
    let request = ChatRequest {
        model: wire.model,
        messages,
        temperature: options.temperature,
        top_p: options.top_p,
        top_k: options.top_k,
        max_tokens: options.num_predict,
        stop: options.stop.map(WireStop::into_vec),
        seed: options.seed,
        presence_penalty: None,
        frequency_penalty: None,
        n: None,
        stream: wire.stream.unwrap_or(true),
        user: None,
    };
    request.validate()?;
    Ok(request)
}

/// Decode an Ollama embeddings request body.
///
/// Accepts the legacy `prompt` field as well as `input` as a string or
/// an array of strings.
pub fn decode_embedding_request(body: &[u8]) -> GatewayResult<EmbeddingRequest> {
    let wire: WireEmbeddingRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::unsupported_payload(DIALECT, err.to_string()))?;

    let inputs = if let Some(prompt) = wire.prompt {
        vec![prompt]
    } else {
        match wire.input {
            Some(Value::String(text)) => vec![text],
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text),
                    _ => Err(GatewayError::unsupported_payload(
                        DIALECT,
                        "input must be a string or an array of strings",
                    )),
                })
                .collect::<GatewayResult<Vec<_>>>()?,
            _ => {
                return Err(GatewayError::unsupported_payload(
                    DIALECT,
                    "request requires a prompt or input field",
                ))
            }
        }
    };

    let request = EmbeddingRequest {
        model: wire.model,
        inputs,
        dimensions: None,
    };
    request.validate()?;
    Ok(request)
}

/// Encode a canonical response as a complete Ollama chat object.
#[must_use]
pub fn encode_chat_response(response: &ChatResponse) -> Value {
    let mut body = json!({
        "model": response.model,
        "created_at": rfc3339(response.created),
        "message": { "role": "assistant", "content": response.content },
        "done": true,
        "done_reason": map_done_reason(response.finish_reason),
    });
    if let Some(usage) = &response.usage {
        body["prompt_eval_count"] = json!(usage.prompt_tokens);
        body["eval_count"] = json!(usage.completion_tokens);
    }
    if let Some(duration) = response.duration {
        body["total_duration"] = json!(duration_nanos(duration));
    }
    body
}

/// Encode one canonical stream chunk as an Ollama NDJSON line.
///
/// Token counts and durations appear only on the terminal object.
#[must_use]
pub fn encode_stream_chunk(chunk: &ChatResponse) -> Vec<StreamFrame> {
    let mut body = json!({
        "model": chunk.model,
        "created_at": rfc3339(chunk.created),
        "message": { "role": "assistant", "content": chunk.content },
        "done": chunk.is_terminal(),
    });
    if chunk.is_terminal() {
        body["done_reason"] = json!(map_done_reason(chunk.finish_reason));
        if let Some(usage) = &chunk.usage {
            body["prompt_eval_count"] = json!(usage.prompt_tokens);
            body["eval_count"] = json!(usage.completion_tokens);
        }
        if let Some(duration) = chunk.duration {
            body["total_duration"] = json!(duration_nanos(duration));
        }
    }
    vec![StreamFrame::data(body.to_string())]
}

/// Encode a mid-stream failure as a terminal Ollama object carrying the
/// error message.
#[must_use]
pub fn encode_stream_failure(error: &GatewayError, model: &str) -> Vec<StreamFrame> {
    let body = json!({
        "model": model,
        "created_at": rfc3339(Utc::now().timestamp()),
        "message": { "role": "assistant", "content": "" },
        "done": true,
        "done_reason": "error",
        "error": error.to_string(),
    });
    vec![StreamFrame::data(body.to_string())]
}

/// Encode a model listing as the Ollama `/api/tags` shape.
#[must_use]
pub fn encode_models_response(models: &[ModelInfo]) -> Value {
    let entries: Vec<Value> = models
        .iter()
        .map(|model| {
            json!({
                "name": model.id,
                "model": model.id,
                "modified_at": rfc3339(model.created.unwrap_or_else(|| Utc::now().timestamp())),
                "size": 0,
                "digest": digest_for(&model.id),
                "details": {
                    "family": model.owned_by,
                    "parameter_size": "unknown",
                },
            })
        })
        .collect();
    json!({ "models": entries })
}

/// Encode a canonical embedding response as the Ollama shape.
#[must_use]
pub fn encode_embedding_response(response: &EmbeddingResponse) -> Value {
    let vectors: Vec<&Vec<f32>> = response
        .embeddings
        .iter()
        .map(|embedding| &embedding.vector)
        .collect();
    let mut body = json!({
        "model": response.model,
        "embeddings": vectors,
    });
    if let Some(usage) = &response.usage {
        body["prompt_eval_count"] = json!(usage.prompt_tokens);
    }
    body
}

/// Encode an error as the Ollama error envelope, a bare message string.
#[must_use]
pub fn encode_error(error: &GatewayError) -> Value {
    json!({ "error": error.to_string() })
}

fn map_done_reason(reason: Option<FinishReason>) -> &'static str {
    match reason {
        Some(FinishReason::Length) => "length",
        Some(FinishReason::Error) => "error",
        _ => "stop",
    }
}

fn rfc3339(created: i64) -> String {
    DateTime::<Utc>::from_timestamp(created, 0)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn duration_nanos(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Stable pseudo-digest for models the gateway proxies; upstream digests
/// are not visible through provider APIs.
fn digest_for(name: &str) -> String {
    let hash = Sha256::digest(name.as_bytes());
    let hex: String = hash.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("sha256:{}", &hex[..12])
}

#[derive(Debug, Deserialize)]
struct WireChatRequest {
    model: String,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    options: Option<WireOptions>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireOptions {
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    num_predict: Option<u32>,
    #[serde(default)]
    stop: Option<WireStop>,
    #[serde(default)]
    seed: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireStop {
    One(String),
    Many(Vec<String>),
}

impl WireStop {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(stop) => vec![stop],
            Self::Many(stops) => stops,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingRequest {
    model: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}
