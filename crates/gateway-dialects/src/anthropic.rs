//! Anthropic messages dialect.
//!
//! Decodes `/v1/messages` payloads into the canonical request model and
//! encodes canonical responses as Anthropic message objects and named
//! SSE events (`message_start`, `content_block_delta`, `message_stop`).

use gateway_core::{
    ChatMessage, ChatRequest, ChatResponse, FinishReason, GatewayError, GatewayResult, Role,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::StreamFrame;

const DIALECT: &str = "anthropic";

/// Decode an Anthropic messages request body.
///
/// The top-level `system` prompt becomes the first canonical message so
/// providers that carry system prompts inline keep their ordering.
pub fn decode_chat_request(body: &[u8]) -> GatewayResult<ChatRequest> {
    let wire: WireMessagesRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::unsupported_payload(DIALECT, err.to_string()))?;

    let mut messages = Vec::with_capacity(wire.messages.len() + 1);
    if let Some(system) = wire.system {
        let text = flatten_content(system);
        if !text.is_empty() {
            messages.push(ChatMessage::system(text));
        }
    }
    for message in wire.messages {
        messages.push(ChatMessage {
            role: Role::from_wire(&message.role),
            content: flatten_content(message.content),
        });
    }

    let request = ChatRequest {
        model: wire.model,
        messages,
        temperature: wire.temperature,
        top_p: wire.top_p,
        top_k: wire.top_k,
        max_tokens: wire.max_tokens,
        stop: wire.stop_sequences,
        seed: None,
        presence_penalty: None,
        frequency_penalty: None,
        n: None,
        stream: wire.stream,
        user: wire.metadata.and_then(|metadata| metadata.user_id),
    };
    request.validate()?;
    Ok(request)
}

/// Encode a canonical response as an Anthropic message object.
#[must_use]
pub fn encode_chat_response(response: &ChatResponse) -> Value {
    let usage = response.usage.unwrap_or_default();
    json!({
        "id": response.id,
        "type": "message",
        "role": "assistant",
        "model": response.model,
        "content": [{ "type": "text", "text": response.content }],
        "stop_reason": response.finish_reason.map(map_stop_reason),
        "stop_sequence": null,
        "usage": {
            "input_tokens": usage.prompt_tokens,
            "output_tokens": usage.completion_tokens,
        },
    })
}

/// Encode one canonical stream chunk as Anthropic SSE events.
///
/// The first chunk opens the message and its single text block; the
/// terminal chunk closes the block and reports the stop reason.
#[must_use]
pub fn encode_stream_chunk(chunk: &ChatResponse) -> Vec<StreamFrame> {
    let mut frames = Vec::new();

    if chunk.stream_index.unwrap_or(0) == 0 {
        frames.push(StreamFrame::named(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": chunk.id,
                    "type": "message",
                    "role": "assistant",
                    "model": chunk.model,
                    "content": [],
                    "stop_reason": null,
                    "usage": { "input_tokens": 0, "output_tokens": 0 },
                },
            })
            .to_string(),
        ));
        frames.push(StreamFrame::named(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": { "type": "text", "text": "" },
            })
            .to_string(),
        ));
    }

    if !chunk.content.is_empty() {
        frames.push(StreamFrame::named(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": { "type": "text_delta", "text": chunk.content },
            })
            .to_string(),
        ));
    }

    if let Some(reason) = chunk.finish_reason {
        frames.push(StreamFrame::named(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": 0 }).to_string(),
        ));
        frames.push(StreamFrame::named(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": map_stop_reason(reason), "stop_sequence": null },
                "usage": {
                    "output_tokens": chunk.usage.map_or(0, |usage| usage.completion_tokens),
                },
            })
            .to_string(),
        ));
        frames.push(StreamFrame::named(
            "message_stop",
            json!({ "type": "message_stop" }).to_string(),
        ));
    }

    frames
}

/// Encode a mid-stream failure as an Anthropic error event followed by
/// `message_stop` so clients always observe a terminated stream.
#[must_use]
pub fn encode_stream_failure(error: &GatewayError) -> Vec<StreamFrame> {
    vec![
        StreamFrame::named("error", encode_error(error).to_string()),
        StreamFrame::named("message_stop", json!({ "type": "message_stop" }).to_string()),
    ]
}

/// Encode an error as the Anthropic error envelope.
#[must_use]
pub fn encode_error(error: &GatewayError) -> Value {
    json!({
        "type": "error",
        "error": {
            "type": error.error_type(),
            "message": error.to_string(),
        }
    })
}

fn map_stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::Stop
        | FinishReason::ContentFilter
        | FinishReason::Error
        | FinishReason::Other => "end_turn",
    }
}

fn flatten_content(content: WireContent) -> String {
    match content {
        WireContent::Text(text) => text,
        WireContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""),
    }
}

#[derive(Debug, Deserialize)]
struct WireMessagesRequest {
    model: String,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    system: Option<WireContent>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    metadata: Option<WireMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    content: WireContent,
}

/// Anthropic content is either a plain string or an array of typed
/// blocks; only text blocks survive the canonical mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    user_id: Option<String>,
}
