//! Canonical embedding request and response model.

use crate::error::GatewayError;
use crate::response::TokenUsage;
use serde::{Deserialize, Serialize};

/// Dialect-neutral embedding request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Target embedding model
    pub model: String,

    /// Input strings to embed, in order
    pub inputs: Vec<String>,

    /// Requested output dimensionality, when the model supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

impl EmbeddingRequest {
    /// Create a request for one or more inputs
    #[must_use]
    pub fn new(model: impl Into<String>, inputs: Vec<String>) -> Self {
        Self {
            model: model.into(),
            inputs,
            dimensions: None,
        }
    }

    /// Validate the request
    ///
    /// # Errors
    /// Returns error if the model is empty or there are no inputs
    pub fn validate(&self) -> Result<(), GatewayError> {
        crate::types::ModelId::new(&self.model)?;
        if self.inputs.is_empty() {
            return Err(GatewayError::validation(
                "inputs cannot be empty",
                Some("input".to_string()),
                "empty_input",
            ));
        }
        Ok(())
    }

    /// Total characters across all inputs, for token estimation
    #[must_use]
    pub fn content_chars(&self) -> usize {
        self.inputs.iter().map(String::len).sum()
    }
}

/// One embedding vector with its source input index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    /// Index of the input this vector embeds
    pub index: u32,
    /// The embedding vector
    pub vector: Vec<f32>,
}

/// Dialect-neutral embedding response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Model that produced the embeddings
    pub model: String,

    /// One vector per input, ordered by index
    pub embeddings: Vec<Embedding>,

    /// Token accounting, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}
