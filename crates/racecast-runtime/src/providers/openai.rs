//! OpenAI-compatible Chat Completions provider.
//!
//! Works against any endpoint speaking the Chat Completions dialect; point
//! `base_url` at a gateway or a self-hosted server to use one.

use super::{
    factory::{validate_base_url, ProviderFactory},
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(api_key, CredentialSource::Programmatic, "OpenAI API key"),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn from_config(settings: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            settings,
            "api_key",
            OPENAI_API_KEY_ENV,
            "OpenAI API key",
        )?;

        let base_url = settings["base_url"]
            .as_str()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self { credential, base_url })
    }

    fn client() -> &'static reqwest::Client {
        static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
        CLIENT.get_or_init(|| {
            reqwest::Client::builder()
                .build()
                .unwrap_or_else(|_| reqwest::Client::new())
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        let response = Self::client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };

            // A 429 here is either a rate limit or an exhausted quota; keep
            // the message so callers can tell which.
            if status == 429 && !message.to_lowercase().contains("quota") {
                return Err(ProviderError::RateLimited { retry_after });
            }
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let usage = body.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: body.model,
            stop_reason: choice.finish_reason,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Factory for OpenAI-compatible providers.
///
/// Settings: `api_key` (optional, falls back to `OPENAI_API_KEY`) and
/// `base_url` (optional).
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, settings: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_config(settings)?))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(settings, "api_key", OPENAI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenAI API key required: set 'api_key' in settings or {} env",
                OPENAI_API_KEY_ENV
            )));
        }
        validate_base_url(settings)
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible Chat Completions endpoint"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let settings = serde_json::json!({
            "api_key": "config-key",
            "base_url": "http://localhost:8080/v1"
        });
        let provider = OpenAiProvider::from_config(&settings).unwrap();
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.credential.source(), CredentialSource::Config);
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret = "sk-openai-racecast-secret";
        let debug = format!("{:?}", OpenAiProvider::new(secret));
        assert!(!debug.contains(secret));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_response_parsing_without_usage() {
        let body: ChatResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{ "message": { "content": "{}" }, "finish_reason": "stop" }]
        }))
        .unwrap();
        assert!(body.usage.is_none());
        assert_eq!(body.choices[0].message.content.as_deref(), Some("{}"));
    }
}
