//! # Gateway Providers
//!
//! Outbound LLM provider clients for the gateway:
//! - OpenAI and OpenAI-compatible endpoints
//! - Anthropic (Claude)
//! - Google Gemini
//! - Ollama (self-hosted local models)
//!
//! Each client adapts the canonical chat and embedding types to one
//! upstream wire format. [`factory::build_provider`] turns a stored
//! provider spec into a boxed client.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use factory::build_provider;
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
