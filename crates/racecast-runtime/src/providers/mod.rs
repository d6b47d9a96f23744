//! Generative-model provider abstractions.
//!
//! Providers are created from configuration through a [`ProviderRegistry`]
//! and called only by the model gateway.
//!
//! ## Security
//!
//! Credentials are held as [`ApiCredential`] values and never appear in
//! `Debug` or `Display` output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

/// Errors from model providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether the provider is refusing work because of rate or usage limits.
    pub fn is_quota(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::ApiError { status, message } => {
                let message = message.to_lowercase();
                *status == 429
                    || message.contains("quota")
                    || message.contains("rate limit")
                    || message.contains("rate_limit")
            }
            _ => false,
        }
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            timeout: Duration::from_secs(120),
        }
    }
}

/// A chat message for completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text, untrusted
    pub content: String,

    pub usage: TokenUsage,

    /// Model that actually served the request
    pub model: String,

    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A generative-model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Provider type name, for logs.
    fn name(&self) -> &str;

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // ~4 chars per token
        (text.len() / 4) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("rules").role, "system");
        assert_eq!(ChatMessage::user("prompt").role, "user");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 1200,
            completion_tokens: 800,
        };
        assert_eq!(usage.total(), 2000);
    }

    #[test]
    fn test_quota_detection() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_quota());
        assert!(ProviderError::ApiError {
            status: 429,
            message: "slow down".into()
        }
        .is_quota());
        assert!(ProviderError::ApiError {
            status: 400,
            message: "You exceeded your current quota".into()
        }
        .is_quota());
        assert!(!ProviderError::ApiError {
            status: 500,
            message: "internal".into()
        }
        .is_quota());
        assert!(!ProviderError::Timeout(Duration::from_secs(1)).is_quota());
    }
}
