//! # Gateway Dialects
//!
//! Bidirectional codecs between the public LLM API dialects and the
//! canonical model. Each dialect module owns its wire structs and exposes:
//!
//! - request decoders (`decode_chat_request`, `decode_embedding_request`)
//!   that fail with [`GatewayError::UnsupportedPayload`] on foreign shapes
//! - response encoders for complete responses, stream chunks, embeddings,
//!   model listings, and error bodies
//!
//! The dialect is fixed at the HTTP route boundary, so decoders take
//! statically known shapes; there is no runtime payload sniffing. The
//! [`Dialect`] enum carries the encode-side operations the streaming
//! coordinator dispatches over.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use gateway_core::{ChatResponse, GatewayError};
use serde_json::Value;

/// A single framed unit of a streamed response body.
///
/// SSE transports render `event:`/`data:` lines; the NDJSON transport
/// renders `data` as one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// SSE event name, for dialects that use named events
    pub event: Option<&'static str>,
    /// Payload, already serialized
    pub data: String,
}

impl StreamFrame {
    /// Frame with a bare `data:` payload
    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Frame with a named SSE event
    #[must_use]
    pub fn named(event: &'static str, data: impl Into<String>) -> Self {
        Self {
            event: Some(event),
            data: data.into(),
        }
    }
}

/// How a dialect transports stream frames to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTransport {
    /// `text/event-stream` with `data:` (and optionally `event:`) lines
    Sse,
    /// `application/x-ndjson`, one JSON object per line
    NdJson,
}

/// The caller-facing wire dialect, fixed per route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// OpenAI chat completions
    OpenAi,
    /// Anthropic messages
    Anthropic,
    /// Google Gemini generateContent
    Gemini,
    /// Ollama chat
    Ollama,
}

impl Dialect {
    /// Stable lowercase name for logs and error bodies
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    /// Transport used for `stream = true` responses
    #[must_use]
    pub fn transport(self) -> StreamTransport {
        match self {
            Self::Ollama => StreamTransport::NdJson,
            _ => StreamTransport::Sse,
        }
    }

    /// Encode one canonical chunk into dialect stream frames
    #[must_use]
    pub fn encode_stream_chunk(self, chunk: &ChatResponse) -> Vec<StreamFrame> {
        match self {
            Self::OpenAi => openai::encode_stream_chunk(chunk),
            Self::Anthropic => anthropic::encode_stream_chunk(chunk),
            Self::Gemini => gemini::encode_stream_chunk(chunk),
            Self::Ollama => ollama::encode_stream_chunk(chunk),
        }
    }

    /// Encode an abnormal termination: the dialect's error frame followed
    /// by its terminal marker, so the stream never hangs unterminated
    #[must_use]
    pub fn encode_stream_failure(self, error: &GatewayError, model: &str) -> Vec<StreamFrame> {
        match self {
            Self::OpenAi => openai::encode_stream_failure(error),
            Self::Anthropic => anthropic::encode_stream_failure(error),
            Self::Gemini => gemini::encode_stream_failure(error),
            Self::Ollama => ollama::encode_stream_failure(error, model),
        }
    }

    /// Frames appended after the last chunk of a well-terminated stream
    #[must_use]
    pub fn stream_epilogue(self) -> Vec<StreamFrame> {
        match self {
            Self::OpenAi => vec![StreamFrame::data("[DONE]")],
            _ => Vec::new(),
        }
    }

    /// Encode an error into the dialect's error body shape
    #[must_use]
    pub fn encode_error(self, error: &GatewayError) -> Value {
        match self {
            Self::OpenAi => openai::encode_error(error),
            Self::Anthropic => anthropic::encode_error(error),
            Self::Gemini => gemini::encode_error(error),
            Self::Ollama => ollama::encode_error(error),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_per_dialect() {
        assert_eq!(Dialect::OpenAi.transport(), StreamTransport::Sse);
        assert_eq!(Dialect::Anthropic.transport(), StreamTransport::Sse);
        assert_eq!(Dialect::Gemini.transport(), StreamTransport::Sse);
        assert_eq!(Dialect::Ollama.transport(), StreamTransport::NdJson);
    }

    #[test]
    fn test_only_openai_has_done_epilogue() {
        assert_eq!(
            Dialect::OpenAi.stream_epilogue(),
            vec![StreamFrame::data("[DONE]")]
        );
        assert!(Dialect::Anthropic.stream_epilogue().is_empty());
        assert!(Dialect::Gemini.stream_epilogue().is_empty());
        assert!(Dialect::Ollama.stream_epilogue().is_empty());
    }
}
