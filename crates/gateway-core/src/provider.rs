//! Provider abstraction and routing-relevant provider metadata.
//!
//! [`LLMProvider`] is the seam between the gateway pipeline and upstream
//! HTTP clients. [`ProviderSpec`] is the read-only view of a configured
//! provider that routing and resilience operate on; tenant administration
//! owns its lifecycle elsewhere.

use crate::embedding::{EmbeddingRequest, EmbeddingResponse};
use crate::error::GatewayResult;
use crate::request::ChatRequest;
use crate::response::{ChatResponse, ModelInfo};
use crate::types::{ProviderId, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Stream of canonical response chunks from an upstream provider
pub type ChatStream = BoxStream<'static, GatewayResult<ChatResponse>>;

/// An upstream LLM provider the gateway can dispatch to
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Identifier of this provider instance
    fn id(&self) -> &ProviderId;

    /// Wire dialect this provider speaks
    fn kind(&self) -> ProviderKind;

    /// Execute a non-streaming chat completion
    async fn chat(&self, request: &ChatRequest) -> GatewayResult<ChatResponse>;

    /// Execute a streaming chat completion.
    ///
    /// The returned stream yields chunks in upstream arrival order and ends
    /// after the terminal chunk. Dropping the stream cancels the upstream
    /// call.
    async fn chat_stream(&self, request: &ChatRequest) -> GatewayResult<ChatStream>;

    /// Compute embeddings
    async fn embed(&self, request: &EmbeddingRequest) -> GatewayResult<EmbeddingResponse>;

    /// List models available behind this provider
    async fn list_models(&self) -> GatewayResult<Vec<ModelInfo>>;
}

/// Wire dialect of an upstream provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions dialect
    OpenAi,
    /// Anthropic messages dialect
    Anthropic,
    /// Google Gemini generateContent dialect
    Gemini,
    /// Ollama local-inference dialect
    Ollama,
    /// OpenAI-compatible custom endpoint
    Custom,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// How inbound transport context selects a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Match when the inbound path starts with `prefix`
    ByPath {
        /// Path prefix, e.g. "/v1"
        prefix: String,
    },
    /// Match when the named header's value equals the provider id
    ByHeader {
        /// Header name, compared case-insensitively
        name: String,
    },
    /// Match when the first host label equals `subdomain`
    BySubdomain {
        /// Expected subdomain label
        subdomain: String,
    },
    /// Always match; the tenant-default strategy
    ByUser,
}

impl RoutingStrategy {
    /// Path-prefix strategy
    #[must_use]
    pub fn by_path(prefix: impl Into<String>) -> Self {
        Self::ByPath {
            prefix: prefix.into(),
        }
    }

    /// Header-match strategy
    #[must_use]
    pub fn by_header(name: impl Into<String>) -> Self {
        Self::ByHeader { name: name.into() }
    }

    /// Subdomain-match strategy
    #[must_use]
    pub fn by_subdomain(subdomain: impl Into<String>) -> Self {
        Self::BySubdomain {
            subdomain: subdomain.into(),
        }
    }
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self::ByUser
    }
}

/// Routing-relevant view of a configured provider.
///
/// Read-only at request time; the registry refreshes whole snapshots on a
/// bounded TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider identifier, unique within the tenant
    pub id: ProviderId,

    /// Owning tenant
    pub tenant: TenantId,

    /// Wire dialect
    pub kind: ProviderKind,

    /// Upstream base URL
    pub base_url: String,

    /// Environment variable holding the upstream API key, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Extra headers sent on every upstream request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Per-attempt upstream timeout
    #[serde(default = "ProviderSpec::default_timeout")]
    pub timeout: Duration,

    /// Maximum retry attempts for transitory failures
    #[serde(default = "ProviderSpec::default_max_retries")]
    pub max_retries: u32,

    /// Selection priority; lower wins
    #[serde(default)]
    pub priority: u32,

    /// Whether this provider participates in routing
    #[serde(default = "ProviderSpec::default_active")]
    pub active: bool,

    /// Strategy deciding which inbound requests this provider matches
    #[serde(default)]
    pub routing: RoutingStrategy,

    /// Creation time, the deterministic tie-break after priority
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ProviderSpec {
    fn default_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_active() -> bool {
        true
    }

    /// Whether this provider matches the given transport context fields
    #[must_use]
    pub fn matches(&self, path: &str, header_value: Option<&str>, subdomain: Option<&str>) -> bool {
        match &self.routing {
            RoutingStrategy::ByPath { prefix } => path.starts_with(prefix.as_str()),
            RoutingStrategy::ByHeader { .. } => {
                header_value.is_some_and(|v| v == self.id.as_str())
            }
            RoutingStrategy::BySubdomain { subdomain: expected } => {
                subdomain.is_some_and(|s| s.eq_ignore_ascii_case(expected))
            }
            RoutingStrategy::ByUser => true,
        }
    }
}
