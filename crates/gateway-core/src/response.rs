//! Canonical chat response model.
//!
//! A non-streaming response is a single [`ChatResponse`]. A streaming
//! response is a sequence of [`ChatResponse`] chunks sharing an `id`; only
//! the terminal chunk carries a finish reason and usage.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dialect-neutral chat completion response or stream chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Response identifier, shared by all chunks of one stream
    pub id: String,

    /// Model that produced the response
    pub model: String,

    /// Unix timestamp (seconds) of creation
    pub created: i64,

    /// Generated content; for chunks, the incremental delta
    pub content: String,

    /// Why generation stopped. `None` on non-terminal stream chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// Token accounting; only present on complete responses and terminal
    /// chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    /// Zero-based position within a stream; `None` for non-streaming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_index: Option<u32>,

    /// Wall-clock duration of the upstream call, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl ChatResponse {
    /// Create a complete (non-streaming) response
    #[must_use]
    pub fn complete(
        id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        finish_reason: FinishReason,
        usage: TokenUsage,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            content: content.into(),
            finish_reason: Some(finish_reason),
            usage: Some(usage),
            stream_index: None,
            duration: None,
        }
    }

    /// Create a non-terminal stream chunk
    #[must_use]
    pub fn chunk(
        id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        stream_index: u32,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            content: content.into(),
            finish_reason: None,
            usage: None,
            stream_index: Some(stream_index),
            duration: None,
        }
    }

    /// Create a terminal stream chunk
    #[must_use]
    pub fn terminal_chunk(
        id: impl Into<String>,
        model: impl Into<String>,
        stream_index: u32,
        finish_reason: FinishReason,
        usage: Option<TokenUsage>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            content: String::new(),
            finish_reason: Some(finish_reason),
            usage,
            stream_index: Some(stream_index),
            duration: None,
        }
    }

    /// Whether this chunk ends its stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Attach a measured duration
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop or stop sequence hit
    Stop,
    /// max_tokens reached
    Length,
    /// Model requested tool invocation
    ToolCalls,
    /// Content policy intervened
    ContentFilter,
    /// Stream terminated abnormally
    Error,
    /// Dialect-specific reason with no canonical equivalent
    Other,
}

/// Token accounting for one request/response pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens generated in the completion
    pub completion_tokens: u32,
    /// Sum of prompt and completion tokens
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Create usage with the total derived from the parts
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Model metadata for listing endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier
    pub id: String,
    /// Owning organization, as reported by the provider
    pub owned_by: String,
    /// Unix timestamp (seconds) the model was created, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
}

impl ModelInfo {
    /// Create model metadata
    #[must_use]
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owned_by: owned_by.into(),
            created: None,
        }
    }
}
