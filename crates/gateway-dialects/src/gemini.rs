//! Google Gemini dialect.
//!
//! Decodes `/v1beta/models/{model}:{action}` payloads into the canonical
//! model and encodes canonical responses as `GenerateContentResponse`
//! objects. The model name and the stream flag come from the URL, not
//! the body, so the decoders take them as arguments.

use gateway_core::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, FinishReason,
    GatewayError, GatewayResult, ModelInfo, Role,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::StreamFrame;

const DIALECT: &str = "gemini";

/// Decode a Gemini `generateContent` request body.
pub fn decode_chat_request(model: &str, stream: bool, body: &[u8]) -> GatewayResult<ChatRequest> {
    let wire: WireGenerateRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::unsupported_payload(DIALECT, err.to_string()))?;

    let mut messages = Vec::with_capacity(wire.contents.len() + 1);
    if let Some(instruction) = wire.system_instruction {
        let text = flatten_parts(instruction.parts);
        if !text.is_empty() {
            messages.push(ChatMessage::system(text));
        }
    }
    for content in wire.contents {
        let role = content
            .role
            .as_deref()
            .map_or(Role::User, Role::from_wire);
        messages.push(ChatMessage {
            role,
            content: flatten_parts(content.parts),
        });
    }

    let config = wire.generation_config.unwrap_or_default();
    let request = ChatRequest {
        model: model.to_string(),
        messages,
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        max_tokens: config.max_output_tokens,
        stop: config.stop_sequences,
        seed: None,
        presence_penalty: None,
        frequency_penalty: None,
        n: config.candidate_count,
        stream,
        user: None,
    };
    request.validate()?;
    Ok(request)
}

/// Decode a Gemini `embedContent` request body.
pub fn decode_embedding_request(model: &str, body: &[u8]) -> GatewayResult<EmbeddingRequest> {
    let wire: WireEmbedRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::unsupported_payload(DIALECT, err.to_string()))?;

    let content = wire.content.ok_or_else(|| {
        GatewayError::unsupported_payload(DIALECT, "embedContent requires a content object")
    })?;

    let request = EmbeddingRequest {
        model: model.to_string(),
        inputs: vec![flatten_parts(content.parts)],
        dimensions: wire.output_dimensionality,
    };
    request.validate()?;
    Ok(request)
}

/// Encode a canonical response as a `GenerateContentResponse`.
#[must_use]
pub fn encode_chat_response(response: &ChatResponse) -> Value {
    let mut body = json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [{ "text": response.content }],
            },
            "finishReason": response.finish_reason.map(map_finish_reason),
            "index": 0,
        }],
        "modelVersion": response.model,
    });
    if let Some(usage) = &response.usage {
        body["usageMetadata"] = json!({
            "promptTokenCount": usage.prompt_tokens,
            "candidatesTokenCount": usage.completion_tokens,
            "totalTokenCount": usage.total_tokens,
        });
    }
    body
}

/// Encode one canonical stream chunk as a Gemini SSE frame.
///
/// Every chunk is a complete `GenerateContentResponse`; `finishReason`
/// and `usageMetadata` appear only on the terminal chunk.
#[must_use]
pub fn encode_stream_chunk(chunk: &ChatResponse) -> Vec<StreamFrame> {
    let mut body = json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [{ "text": chunk.content }],
            },
            "index": 0,
        }],
        "modelVersion": chunk.model,
    });
    if let Some(reason) = chunk.finish_reason {
        body["candidates"][0]["finishReason"] = json!(map_finish_reason(reason));
        if let Some(usage) = &chunk.usage {
            body["usageMetadata"] = json!({
                "promptTokenCount": usage.prompt_tokens,
                "candidatesTokenCount": usage.completion_tokens,
                "totalTokenCount": usage.total_tokens,
            });
        }
    }
    vec![StreamFrame::data(body.to_string())]
}

/// Encode a mid-stream failure as a Gemini SSE error frame.
#[must_use]
pub fn encode_stream_failure(error: &GatewayError) -> Vec<StreamFrame> {
    vec![StreamFrame::data(encode_error(error).to_string())]
}

/// Encode a model listing as the Gemini `/v1beta/models` shape.
#[must_use]
pub fn encode_models_response(models: &[ModelInfo]) -> Value {
    let entries: Vec<Value> = models
        .iter()
        .map(|model| {
            json!({
                "name": format!("models/{}", model.id),
                "displayName": model.id,
            })
        })
        .collect();
    json!({ "models": entries })
}

/// Encode a canonical embedding response as the `embedContent` shape.
#[must_use]
pub fn encode_embedding_response(response: &EmbeddingResponse) -> Value {
    if let [embedding] = response.embeddings.as_slice() {
        return json!({ "embedding": { "values": embedding.vector } });
    }
    let values: Vec<Value> = response
        .embeddings
        .iter()
        .map(|embedding| json!({ "values": embedding.vector }))
        .collect();
    json!({ "embeddings": values })
}

/// Encode an error as the Gemini error envelope.
#[must_use]
pub fn encode_error(error: &GatewayError) -> Value {
    let code = error.status_code().as_u16();
    json!({
        "error": {
            "code": code,
            "message": error.to_string(),
            "status": map_status(code),
        }
    })
}

fn map_finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ToolCalls => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ContentFilter => "SAFETY",
        FinishReason::Error | FinishReason::Other => "OTHER",
    }
}

fn map_status(code: u16) -> &'static str {
    match code {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        500 => "INTERNAL",
        502 | 503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        _ => "UNKNOWN",
    }
}

fn flatten_parts(parts: Vec<WirePart>) -> String {
    parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerateRequest {
    #[serde(default)]
    contents: Vec<WireContent>,
    #[serde(default)]
    system_instruction: Option<WireContent>,
    #[serde(default)]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    max_output_tokens: Option<u32>,
    #[serde(default)]
    stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    candidate_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEmbedRequest {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    output_dimensionality: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::TokenUsage;

    #[test]
    fn decodes_contents_and_system_instruction() {
        let body = r#"{
            "systemInstruction": { "parts": [{ "text": "Answer in French." }] },
            "contents": [
                { "role": "user", "parts": [{ "text": "Hello" }] },
                { "role": "model", "parts": [{ "text": "Bonjour" }] },
                { "role": "user", "parts": [{ "text": "Thanks" }] }
            ],
            "generationConfig": {
                "temperature": 0.5,
                "topP": 0.8,
                "topK": 20,
                "maxOutputTokens": 512,
                "stopSequences": ["FIN"]
            }
        }"#;

        let request = decode_chat_request("gemini-1.5-pro", false, body.as_bytes())
            .expect("request should decode");

        assert_eq!(request.model, "gemini-1.5-pro");
        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[2].role, Role::Assistant);
        assert_eq!(request.temperature, Some(0.5));
        assert_eq!(request.top_k, Some(20));
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.stop, Some(vec!["FIN".to_string()]));
        assert!(!request.stream);
    }

    #[test]
    fn stream_flag_comes_from_the_caller() {
        let body = r#"{"contents":[{"role":"user","parts":[{"text":"Hi"}]}]}"#;
        let request = decode_chat_request("gemini-1.5-flash", true, body.as_bytes())
            .expect("request should decode");
        assert!(request.stream);
    }

    #[test]
    fn missing_role_defaults_to_user() {
        let body = r#"{"contents":[{"parts":[{"text":"Hi"}]}]}"#;
        let request = decode_chat_request("gemini-1.5-flash", false, body.as_bytes())
            .expect("request should decode");
        assert_eq!(request.messages[0].role, Role::User);
    }

    #[test]
    fn multiple_parts_are_joined() {
        let body = r#"{"contents":[{"role":"user","parts":[{"text":"a"},{"text":"b"}]}]}"#;
        let request = decode_chat_request("gemini-1.5-flash", false, body.as_bytes())
            .expect("request should decode");
        assert_eq!(request.messages[0].content, "ab");
    }

    #[test]
    fn encodes_generate_content_response() {
        let response = ChatResponse::complete(
            "resp-1",
            "gemini-1.5-pro",
            "Bonjour",
            FinishReason::Stop,
            TokenUsage::new(9, 3),
        );

        let body = encode_chat_response(&response);
        let candidate = &body["candidates"][0];
        assert_eq!(candidate["content"]["role"], "model");
        assert_eq!(candidate["content"]["parts"][0]["text"], "Bonjour");
        assert_eq!(candidate["finishReason"], "STOP");
        assert_eq!(body["usageMetadata"]["promptTokenCount"], 9);
        assert_eq!(body["usageMetadata"]["totalTokenCount"], 12);
    }

    #[test]
    fn safety_maps_to_content_filter_wire_value() {
        let response = ChatResponse::complete(
            "resp-1",
            "gemini-1.5-pro",
            "",
            FinishReason::ContentFilter,
            TokenUsage::new(1, 0),
        );
        assert_eq!(
            encode_chat_response(&response)["candidates"][0]["finishReason"],
            "SAFETY"
        );
    }

    #[test]
    fn middle_chunk_has_no_finish_reason() {
        let chunk = ChatResponse::chunk("resp-1", "gemini-1.5-flash", "Bon", 2);
        let frames = encode_stream_chunk(&chunk);
        assert_eq!(frames.len(), 1);

        let body: Value = serde_json::from_str(&frames[0].data).expect("frame should parse");
        assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "Bon");
        assert!(body["candidates"][0].get("finishReason").is_none());
        assert!(body.get("usageMetadata").is_none());
    }

    #[test]
    fn terminal_chunk_reports_finish_and_usage() {
        let chunk = ChatResponse::terminal_chunk(
            "resp-1",
            "gemini-1.5-flash",
            7,
            FinishReason::Length,
            Some(TokenUsage::new(4, 16)),
        );
        let frames = encode_stream_chunk(&chunk);
        let body: Value = serde_json::from_str(&frames[0].data).expect("frame should parse");

        assert_eq!(body["candidates"][0]["finishReason"], "MAX_TOKENS");
        assert_eq!(body["usageMetadata"]["candidatesTokenCount"], 16);
    }

    #[test]
    fn embed_request_round_trip() {
        let body = r#"{"content":{"parts":[{"text":"embed me"}]},"outputDimensionality":128}"#;
        let request = decode_embedding_request("text-embedding-004", body.as_bytes())
            .expect("request should decode");
        assert_eq!(request.inputs, vec!["embed me".to_string()]);
        assert_eq!(request.dimensions, Some(128));

        let response = EmbeddingResponse {
            model: "text-embedding-004".to_string(),
            embeddings: vec![gateway_core::Embedding {
                index: 0,
                vector: vec![0.5, 0.25],
            }],
            usage: None,
        };
        let encoded = encode_embedding_response(&response);
        assert_eq!(encoded["embedding"]["values"][1], 0.25);
    }

    #[test]
    fn error_envelope_uses_grpc_style_status() {
        let error = GatewayError::rate_limited(
            "tenant",
            "too many requests",
            100,
            std::time::Duration::from_secs(10),
        );
        let body = encode_error(&error);
        assert_eq!(body["error"]["code"], 429);
        assert_eq!(body["error"]["status"], "RESOURCE_EXHAUSTED");
    }

    #[test]
    fn no_eligible_provider_maps_to_unavailable() {
        let error = GatewayError::no_eligible_provider("default");
        let body = encode_error(&error);
        assert_eq!(body["error"]["status"], "UNAVAILABLE");
    }
}
