//! Provider factories.
//!
//! Each provider type registers a factory that builds instances from the
//! free-form `settings` of a provider binding. The gateway looks types up by
//! name, so adding a backend never touches an enum.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds providers of one type from configuration.
pub trait ProviderFactory: Send + Sync {
    /// Unique type name, matched against a binding's `type`.
    fn provider_type(&self) -> &'static str;

    fn create(&self, settings: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check settings without creating a provider.
    fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError>;

    /// Model used when a binding does not name one.
    fn default_model(&self) -> &'static str;

    fn description(&self) -> &'static str {
        "Generative model provider"
    }
}

/// Provider factories by type name.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type name.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    pub fn create(
        &self,
        provider_type: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factory(provider_type)?.create(settings)
    }

    pub fn validate(&self, provider_type: &str, settings: &JsonValue) -> Result<(), ProviderError> {
        self.factory(provider_type)?.validate_config(settings)
    }

    pub fn default_model(&self, provider_type: &str) -> Option<&'static str> {
        self.factories.get(provider_type).map(|f| f.default_model())
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }

    /// A registry with every provider compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));
        registry
    }
}

/// Reject `base_url` settings that are not HTTP(S) URLs.
#[cfg_attr(not(any(feature = "anthropic", feature = "openai")), allow(dead_code))]
pub(super) fn validate_base_url(settings: &JsonValue) -> Result<(), ProviderError> {
    if let Some(url) = settings["base_url"].as_str() {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ProviderError::NotConfigured(
                "base_url must start with http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, TokenUsage};
    use async_trait::async_trait;

    struct EchoProvider {
        name: String,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                usage: TokenUsage::default(),
                model: config.model.clone(),
                stop_reason: None,
            })
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct EchoFactory;

    impl ProviderFactory for EchoFactory {
        fn provider_type(&self) -> &'static str {
            "echo"
        }

        fn create(&self, settings: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            self.validate_config(settings)?;
            let name = settings["name"].as_str().unwrap_or("echo").to_string();
            Ok(Arc::new(EchoProvider { name }))
        }

        fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError> {
            if settings["broken"].as_bool() == Some(true) {
                return Err(ProviderError::NotConfigured("broken".into()));
            }
            Ok(())
        }

        fn default_model(&self) -> &'static str {
            "echo-1"
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoFactory));

        assert!(registry.has_provider("echo"));
        assert_eq!(registry.available_types(), vec!["echo"]);
        assert_eq!(registry.default_model("echo"), Some("echo-1"));

        let provider = registry
            .create("echo", &serde_json::json!({ "name": "loud-echo" }))
            .unwrap();
        assert_eq!(provider.name(), "loud-echo");
    }

    #[test]
    fn test_unknown_type() {
        let registry = ProviderRegistry::new();
        match registry.create("nope", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => assert!(msg.contains("Unknown provider type")),
            _ => panic!("expected NotConfigured"),
        }
        assert!(registry.validate("nope", &serde_json::json!({})).is_err());
    }

    #[test]
    fn test_validate_delegates_to_factory() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoFactory));

        assert!(registry.validate("echo", &serde_json::json!({})).is_ok());
        assert!(registry.validate("echo", &serde_json::json!({ "broken": true })).is_err());
    }
}
