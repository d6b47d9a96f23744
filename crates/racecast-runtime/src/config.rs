//! Runtime configuration.
//!
//! ```yaml
//! default_provider: claude
//! providers:
//!   claude:
//!     type: anthropic
//!     model: claude-sonnet-4-5-20250929
//!     timeout: 2m
//!   local:
//!     type: openai
//!     max_tokens: 4096
//!     settings:
//!       base_url: http://localhost:8080/v1
//! directory:
//!   max_entries: 500
//!   ttl: 10m
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::providers::CompletionConfig;

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Binding preselected for new scenarios
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Model provider bindings by id
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderBinding>,

    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// One selectable model provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBinding {
    /// Factory type name ("anthropic", "openai")
    #[serde(rename = "type")]
    pub provider_type: String,

    /// Model name; the factory default when absent
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Passed verbatim to the provider factory
    #[serde(default)]
    pub settings: JsonValue,
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

impl ProviderBinding {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout: default_timeout(),
            settings: JsonValue::Null,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Completion settings for a call through this binding.
    pub fn completion_config(&self, default_model: &str) -> CompletionConfig {
        CompletionConfig {
            model: self
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.timeout,
        }
    }
}

/// Candidate directory cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

fn default_max_entries() -> u64 {
    1000
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl: default_ttl(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    pub fn with_provider(mut self, id: impl Into<String>, binding: ProviderBinding) -> Self {
        self.providers.insert(id.into(), binding);
        self
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(default) = &self.default_provider {
            if !self.providers.contains_key(default) {
                return Err(ConfigError::Invalid(format!(
                    "default_provider '{}' is not a configured provider",
                    default
                )));
            }
        }

        for (id, binding) in &self.providers {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("provider id must not be empty".into()));
            }
            if binding.provider_type.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("provider '{}' has no type", id)));
            }
            if binding.timeout.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' timeout must be greater than zero",
                    id
                )));
            }
            if binding.max_tokens == 0 {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' max_tokens must be greater than zero",
                    id
                )));
            }
            if !(0.0..=2.0).contains(&binding.temperature) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' temperature must be between 0 and 2",
                    id
                )));
            }
        }

        if self.directory.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "directory.max_entries must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
default_provider: claude
providers:
  claude:
    type: anthropic
    model: claude-sonnet-4-5-20250929
    timeout: 90s
    settings:
      api_key: sk-test
  local:
    type: openai
    max_tokens: 4096
    settings:
      base_url: http://localhost:8080/v1
directory:
  ttl: 10m
"#;

    #[test]
    fn test_from_yaml() {
        let config = RuntimeConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.default_provider.as_deref(), Some("claude"));

        let claude = &config.providers["claude"];
        assert_eq!(claude.provider_type, "anthropic");
        assert_eq!(claude.timeout, Duration::from_secs(90));
        assert_eq!(claude.settings["api_key"], "sk-test");

        let local = &config.providers["local"];
        assert_eq!(local.max_tokens, 4096);
        assert_eq!(local.timeout, Duration::from_secs(120));
        assert!(local.model.is_none());

        assert_eq!(config.directory.ttl, Duration::from_secs(600));
        assert_eq!(config.directory.max_entries, 1000);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "providers": { "p": { "type": "openai", "timeout": "30s" } }
        }"#;
        let config = RuntimeConfig::from_json(json).unwrap();
        assert_eq!(config.providers["p"].timeout, Duration::from_secs(30));
        assert!(config.default_provider.is_none());
    }

    #[test]
    fn test_unknown_default_provider_rejected() {
        let yaml = "default_provider: missing\nproviders: {}\n";
        assert!(matches!(
            RuntimeConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = "providers:\n  p:\n    type: anthropic\n    timeout: 0s\n";
        assert!(matches!(
            RuntimeConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_bad_duration_is_parse_error() {
        let yaml = "providers:\n  p:\n    type: anthropic\n    timeout: soon\n";
        assert!(matches!(RuntimeConfig::from_yaml(yaml), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_completion_config_uses_default_model() {
        let binding = ProviderBinding::new("anthropic").with_timeout(Duration::from_secs(5));
        let config = binding.completion_config("fallback-model");
        assert_eq!(config.model, "fallback-model");
        assert_eq!(config.timeout, Duration::from_secs(5));

        let named = ProviderBinding::new("anthropic").with_model("named");
        assert_eq!(named.completion_config("fallback-model").model, "named");
    }

    #[test]
    fn test_round_trip_durations_as_strings() {
        let config = RuntimeConfig::default().with_provider("p", ProviderBinding::new("openai"));
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("timeout: 2m"));
        assert_eq!(RuntimeConfig::from_yaml(&yaml).unwrap(), config);
    }
}
