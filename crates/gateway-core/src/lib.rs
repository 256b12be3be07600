//! # Gateway Core
//!
//! Canonical types, traits, and error handling for the LLM gateway.
//!
//! This crate provides the foundation the rest of the workspace builds on:
//! - The dialect-neutral chat and embedding request/response model
//! - The [`LLMProvider`] trait and provider metadata
//! - The [`GatewayError`] taxonomy
//! - Validated domain newtypes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod embedding;
pub mod error;
pub mod provider;
pub mod request;
pub mod response;
pub mod types;

// Re-export commonly used types
pub use embedding::{Embedding, EmbeddingRequest, EmbeddingResponse};
pub use error::{GatewayError, GatewayResult};
pub use provider::{
    ChatStream, LLMProvider, ProviderKind, ProviderSpec, RoutingStrategy,
};
pub use request::{ChatMessage, ChatRequest, ChatRequestBuilder, Role};
pub use response::{ChatResponse, FinishReason, ModelInfo, TokenUsage};
pub use types::{
    ApiKey, MaxTokens, ModelId, ProviderId, RequestId, Temperature, TenantId, TopK, TopP,
};
