//! Model gateway.
//!
//! Sends a compiled prompt to the provider binding a scenario selected and
//! hands back the raw text. The gateway never retries: a failed call is
//! reported to the user, who decides whether to try again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use racecast_core::SYSTEM_PROMPT;

use crate::config::RuntimeConfig;
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, ProviderError, ProviderRegistry, TokenUsage,
};

/// Errors from a model call.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Model provider '{provider}' quota or rate limit reached: {source}")]
    Quota {
        provider: String,
        source: ProviderError,
    },

    #[error("Unknown model provider: {0}")]
    UnknownProvider(String),

    #[error("Model provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        source: ProviderError,
    },
}

impl GatewayError {
    fn from_provider(provider: &str, source: ProviderError) -> Self {
        if source.is_quota() {
            GatewayError::Quota {
                provider: provider.to_string(),
                source,
            }
        } else {
            GatewayError::Provider {
                provider: provider.to_string(),
                source,
            }
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, GatewayError::Quota { .. })
    }
}

/// Raw result of one model call.
#[derive(Debug, Clone)]
pub struct GatewayOutput {
    /// Untrusted model text
    pub raw_text: String,
    pub provider_id: String,
    /// Model that actually served the request
    pub model: String,
    pub usage: TokenUsage,
}

/// Accumulated usage for one provider binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub calls: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl ProviderUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Token usage by provider binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageLedger {
    by_provider: BTreeMap<String, ProviderUsage>,
}

impl UsageLedger {
    pub fn record(&mut self, provider_id: &str, usage: &TokenUsage, model: &str) {
        let entry = self.by_provider.entry(provider_id.to_string()).or_default();
        entry.calls += 1;
        entry.prompt_tokens += u64::from(usage.prompt_tokens);
        entry.completion_tokens += u64::from(usage.completion_tokens);
        entry.estimated_cost += Self::estimate_cost(usage, model);
    }

    pub fn get(&self, provider_id: &str) -> Option<&ProviderUsage> {
        self.by_provider.get(provider_id)
    }

    pub fn total_cost(&self) -> f64 {
        self.by_provider.values().map(|u| u.estimated_cost).sum()
    }

    pub fn total_calls(&self) -> u32 {
        self.by_provider.values().map(|u| u.calls).sum()
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens
        let (input_rate, output_rate) = match model {
            m if m.contains("sonnet-4-5") => (3.0, 15.0),
            m if m.contains("opus-4-5") => (5.0, 25.0),
            m if m.contains("haiku-4-5") => (1.0, 5.0),
            m if m.contains("gpt-4o-mini") => (0.15, 0.6),
            m if m.contains("gpt-4o") => (2.5, 10.0),
            _ => (3.0, 15.0),
        };

        (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate
            + (usage.completion_tokens as f64 / 1_000_000.0) * output_rate
    }
}

struct Binding {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
}

/// Routes prompts to provider bindings by id.
pub struct ModelGateway {
    bindings: BTreeMap<String, Binding>,
    ledger: Mutex<UsageLedger>,
}

impl ModelGateway {
    pub fn new() -> Self {
        Self {
            bindings: BTreeMap::new(),
            ledger: Mutex::new(UsageLedger::default()),
        }
    }

    /// Build every configured binding through the registry.
    pub fn from_config(
        config: &RuntimeConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self, GatewayError> {
        let mut gateway = Self::new();

        for (id, binding) in &config.providers {
            let provider = registry
                .create(&binding.provider_type, &binding.settings)
                .map_err(|e| GatewayError::from_provider(id, e))?;
            let default_model = registry.default_model(&binding.provider_type).unwrap_or_default();
            gateway.register(id.clone(), provider, binding.completion_config(default_model));
        }

        tracing::debug!(providers = ?gateway.provider_ids(), "Model gateway ready");
        Ok(gateway)
    }

    pub fn register(
        &mut self,
        id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        config: CompletionConfig,
    ) {
        self.bindings.insert(id.into(), Binding { provider, config });
    }

    pub fn with_provider(
        mut self,
        id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        config: CompletionConfig,
    ) -> Self {
        self.register(id, provider, config);
        self
    }

    pub fn has_provider(&self, id: &str) -> bool {
        self.bindings.contains_key(id)
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.bindings.keys().map(|s| s.as_str()).collect()
    }

    /// Send a prompt through a provider binding.
    ///
    /// The call is bounded by the binding's timeout.
    pub async fn execute(&self, prompt: &str, provider_id: &str) -> Result<GatewayOutput, GatewayError> {
        let binding = self
            .bindings
            .get(provider_id)
            .ok_or_else(|| GatewayError::UnknownProvider(provider_id.to_string()))?;

        let messages = vec![ChatMessage::system(SYSTEM_PROMPT.trim()), ChatMessage::user(prompt)];
        tracing::debug!(
            provider = provider_id,
            model = %binding.config.model,
            estimated_tokens = binding.provider.estimate_tokens(prompt),
            "Sending synthesis prompt"
        );

        let result = tokio::time::timeout(
            binding.config.timeout,
            binding.provider.complete(messages, &binding.config),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout(binding.config.timeout)));

        let response = result.map_err(|e| {
            tracing::warn!(provider = provider_id, error = %e, "Model call failed");
            GatewayError::from_provider(provider_id, e)
        })?;

        let model = if response.model.trim().is_empty() {
            binding.config.model.clone()
        } else {
            response.model
        };

        self.ledger.lock().record(provider_id, &response.usage, &model);
        tracing::info!(
            provider = provider_id,
            model = %model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "Model call complete"
        );

        Ok(GatewayOutput {
            raw_text: response.content,
            provider_id: provider_id.to_string(),
            model,
            usage: response.usage,
        })
    }

    /// Snapshot of usage so far.
    pub fn usage(&self) -> UsageLedger {
        self.ledger.lock().clone()
    }
}

impl Default for ModelGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("providers", &self.provider_ids())
            .finish()
    }
}
