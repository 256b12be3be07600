//! Validated domain newtypes.
//!
//! Thin wrappers that make invalid values unrepresentable once constructed.
//! All wire-facing types serialize transparently as their inner value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error produced when constructing a validated type from a raw value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct TypeError {
    /// Field that failed validation
    pub field: &'static str,
    /// Human-readable reason
    pub reason: String,
}

impl TypeError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Validated model identifier. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Maximum accepted length for a model identifier
    pub const MAX_LEN: usize = 256;

    /// Create a validated model identifier
    ///
    /// # Errors
    /// Returns error if the value is empty or longer than [`Self::MAX_LEN`]
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(TypeError::new("model", "must not be empty"));
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(TypeError::new(
                "model",
                format!("must be at most {} characters", Self::MAX_LEN),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant identifier, the billing and isolation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant identifier
    ///
    /// # Errors
    /// Returns error if the value is empty
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TypeError::new("tenant_id", "must not be empty"));
        }
        Ok(Self(value))
    }

    /// The tenant used when a request carries no tenant header
    #[must_use]
    pub fn default_tenant() -> Self {
        Self("default".to_string())
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider identifier within a tenant's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a provider identifier
    ///
    /// # Errors
    /// Returns error if the value is empty
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TypeError::new("provider_id", "must not be empty"));
        }
        Ok(Self(value))
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random request identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an identifier received from the caller
    #[must_use]
    pub fn from_value(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            Self::generate()
        } else {
            Self(value)
        }
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller API key. Debug and Display redact all but a short prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    /// Create an API key wrapper
    ///
    /// # Errors
    /// Returns error if the value is empty
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TypeError::new("api_key", "must not be empty"));
        }
        Ok(Self(value))
    }

    /// Full key value, for hashing into rate-limit dimension keys
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Redacted form safe for logs
    #[must_use]
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        format!("{prefix}***")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.redacted())
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Sampling temperature, valid over `[0.0, 2.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(f32);

impl Temperature {
    /// Create a validated temperature
    ///
    /// # Errors
    /// Returns error if the value is outside `[0.0, 2.0]` or not finite
    pub fn new(value: f32) -> Result<Self, TypeError> {
        if !value.is_finite() || !(0.0..=2.0).contains(&value) {
            return Err(TypeError::new(
                "temperature",
                format!("must be between 0.0 and 2.0, got {value}"),
            ));
        }
        Ok(Self(value))
    }

    /// Get the inner value
    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }
}

/// Nucleus sampling parameter, valid over `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopP(f32);

impl TopP {
    /// Create a validated top_p
    ///
    /// # Errors
    /// Returns error if the value is outside `[0.0, 1.0]` or not finite
    pub fn new(value: f32) -> Result<Self, TypeError> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(TypeError::new(
                "top_p",
                format!("must be between 0.0 and 1.0, got {value}"),
            ));
        }
        Ok(Self(value))
    }

    /// Get the inner value
    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }
}

/// Top-k sampling parameter, at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopK(u32);

impl TopK {
    /// Create a validated top_k
    ///
    /// # Errors
    /// Returns error if the value is zero
    pub fn new(value: u32) -> Result<Self, TypeError> {
        if value == 0 {
            return Err(TypeError::new("top_k", "must be at least 1"));
        }
        Ok(Self(value))
    }

    /// Get the inner value
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

/// Maximum tokens to generate, at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxTokens(u32);

impl MaxTokens {
    /// Create a validated max_tokens
    ///
    /// # Errors
    /// Returns error if the value is zero
    pub fn new(value: u32) -> Result<Self, TypeError> {
        if value == 0 {
            return Err(TypeError::new("max_tokens", "must be at least 1"));
        }
        Ok(Self(value))
    }

    /// Get the inner value
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}
