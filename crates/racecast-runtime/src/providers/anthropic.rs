//! Anthropic Messages API provider.

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

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(api_key, CredentialSource::Programmatic, "Anthropic API key"),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Build from binding settings (`api_key`, `base_url`), falling back to
    /// `ANTHROPIC_API_KEY`.
    pub fn from_config(settings: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            settings,
            "api_key",
            ANTHROPIC_API_KEY_ENV,
            "Anthropic API key",
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
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
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
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        // The Messages API takes the system prompt out of band.
        let mut system: Option<String> = None;
        let mut turns = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role == "system" {
                system = Some(match system {
                    Some(existing) => format!("{}\n\n{}", existing, message.content),
                    None => message.content,
                });
            } else {
                turns.push(message);
            }
        }

        let request = MessagesRequest {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system,
            messages: turns,
            temperature: config.temperature,
        };

        let response = Self::client()
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
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

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            },
            model: body.model,
            stop_reason: body.stop_reason,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Factory for Anthropic providers.
///
/// Settings: `api_key` (optional, falls back to `ANTHROPIC_API_KEY`) and
/// `base_url` (optional).
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, settings: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(AnthropicProvider::from_config(settings)?))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(settings, "api_key", ANTHROPIC_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Anthropic API key required: set 'api_key' in settings or {} env",
                ANTHROPIC_API_KEY_ENV
            )));
        }
        validate_base_url(settings)
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude via the Messages API"
    }
}
