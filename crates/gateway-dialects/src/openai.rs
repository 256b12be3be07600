//! OpenAI chat-completions dialect.
//!
//! Decodes `/v1/chat/completions` and `/v1/embeddings` payloads into the
//! canonical request model and encodes canonical responses back into
//! OpenAI wire shapes, including SSE stream chunks.

use gateway_core::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason,
    GatewayError, GatewayResult, ModelInfo, Role,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::StreamFrame;

const DIALECT: &str = "openai";

/// Decode an OpenAI chat completion request body.
pub fn decode_chat_request(body: &[u8]) -> GatewayResult<ChatRequest> {
    let wire: WireChatRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::unsupported_payload(DIALECT, err.to_string()))?;

    let messages = wire
        .messages
        .into_iter()
        .map(|message| ChatMessage {
            role: Role::from_wire(&message.role),
            content: flatten_content(message.content),
        })
        .collect();

    let request = ChatRequest {
        model: wire.model,
        messages,
        temperature: wire.temperature,
        top_p: wire.top_p,
        top_k: None,
        max_tokens: wire.max_tokens,
        stop: wire.stop.map(WireStop::into_vec),
        seed: wire.seed,
        presence_penalty: wire.presence_penalty,
        frequency_penalty: wire.frequency_penalty,
        n: wire.n,
        stream: wire.stream,
        user: wire.user,
    };
    request.validate()?;
    Ok(request)
}

/// Decode an OpenAI embeddings request body.
///
/// `input` accepts a single string or an array of strings, matching the
/// upstream API.
pub fn decode_embedding_request(body: &[u8]) -> GatewayResult<EmbeddingRequest> {
    let wire: WireEmbeddingRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::unsupported_payload(DIALECT, err.to_string()))?;

    let inputs = match wire.input {
        Value::String(text) => vec![text],
        Value::Array(items) => items
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
                "input must be a string or an array of strings",
            ))
        }
    };

    let request = EmbeddingRequest {
        model: wire.model,
        inputs,
        dimensions: wire.dimensions,
    };
    request.validate()?;
    Ok(request)
}

/// Encode a canonical response as an OpenAI chat completion object.
#[must_use]
pub fn encode_chat_response(response: &ChatResponse) -> Value {
    let mut body = json!({
        "id": response.id,
        "object": "chat.completion",
        "created": response.created,
        "model": response.model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": response.content,
            },
            "finish_reason": response.finish_reason.and_then(map_finish_reason),
        }],
    });
    if let Some(usage) = &response.usage {
        body["usage"] = json!({
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        });
    }
    body
}

/// Encode one canonical stream chunk as OpenAI SSE frames.
#[must_use]
pub fn encode_stream_chunk(chunk: &ChatResponse) -> Vec<StreamFrame> {
    let index = chunk.stream_index.unwrap_or(0);
    let mut delta = json!({});
    if index == 0 {
        delta["role"] = json!("assistant");
    }
    if !chunk.content.is_empty() {
        delta["content"] = json!(chunk.content);
    }

    let mut body = json!({
        "id": chunk.id,
        "object": "chat.completion.chunk",
        "created": chunk.created,
        "model": chunk.model,
        "choices": [{
            "index": index,
            "delta": delta,
            "finish_reason": chunk.finish_reason.and_then(map_finish_reason),
        }],
    });
    if chunk.is_terminal() {
        if let Some(usage) = &chunk.usage {
            body["usage"] = json!({
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
                "total_tokens": usage.total_tokens,
            });
        }
    }

    vec![StreamFrame::data(body.to_string())]
}

/// Encode a mid-stream failure as an OpenAI SSE error frame.
#[must_use]
pub fn encode_stream_failure(error: &GatewayError) -> Vec<StreamFrame> {
    vec![StreamFrame::data(encode_error(error).to_string())]
}

/// Encode a model listing as the OpenAI `/v1/models` shape.
#[must_use]
pub fn encode_models_response(models: &[ModelInfo]) -> Value {
    let now = chrono::Utc::now().timestamp();
    let data: Vec<Value> = models
        .iter()
        .map(|model| {
            json!({
                "id": model.id,
                "object": "model",
                "created": model.created.unwrap_or(now),
                "owned_by": model.owned_by,
            })
        })
        .collect();
    json!({ "object": "list", "data": data })
}

/// Encode a canonical embedding response as the OpenAI shape.
#[must_use]
pub fn encode_embedding_response(response: &EmbeddingResponse) -> Value {
    let data: Vec<Value> = response
        .embeddings
        .iter()
        .map(|embedding| {
            json!({
                "object": "embedding",
                "index": embedding.index,
                "embedding": embedding.vector,
            })
        })
        .collect();
    let mut body = json!({
        "object": "list",
        "data": data,
        "model": response.model,
    });
    if let Some(usage) = &response.usage {
        body["usage"] = json!({
            "prompt_tokens": usage.prompt_tokens,
            "total_tokens": usage.total_tokens,
        });
    }
    body
}

/// Encode an error as the OpenAI error envelope.
#[must_use]
pub fn encode_error(error: &GatewayError) -> Value {
    json!({
        "error": {
            "message": error.to_string(),
            "type": error.error_type(),
            "code": error.error_code(),
        }
    })
}

fn map_finish_reason(reason: FinishReason) -> Option<&'static str> {
    match reason {
        FinishReason::Stop => Some("stop"),
        FinishReason::Length => Some("length"),
        FinishReason::ToolCalls => Some("tool_calls"),
        FinishReason::ContentFilter => Some("content_filter"),
        FinishReason::Error | FinishReason::Other => None,
    }
}

fn flatten_content(content: Option<WireContent>) -> String {
    match content {
        Some(WireContent::Text(text)) => text,
        Some(WireContent::Parts(parts)) => parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join(""),
        None => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct WireChatRequest {
    model: String,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    stop: Option<WireStop>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    presence_penalty: Option<f32>,
    #[serde(default)]
    frequency_penalty: Option<f32>,
    #[serde(default)]
    n: Option<u32>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<WireContent>,
}

/// OpenAI message content is either a plain string or an array of typed
/// parts; only text parts survive the canonical mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
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
    input: Value,
    #[serde(default)]
    dimensions: Option<u32>,
}
