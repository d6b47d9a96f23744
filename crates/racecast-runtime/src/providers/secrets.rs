//! Credential handling for model providers.
//!
//! API keys are wrapped in [`ApiCredential`] as soon as they are read, so
//! they cannot end up in a log line or an error message. The value is only
//! exposed at the point where a request header is set.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Provider `settings` in the runtime configuration
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// An API key that redacts itself in `Debug` and `Display`.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read a credential from provider settings, falling back to an
    /// environment variable. Blank values count as missing.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str().filter(|v| !v.trim().is_empty()) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(Self::new(value, CredentialSource::Environment, name))
            }
            _ => Err(ProviderError::NotConfigured(format!(
                "{} required: set '{}' in provider settings or the {} environment variable",
                name, config_key, env_var
            ))),
        }
    }

    /// Check whether a credential could be loaded, without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key]
            .as_str()
            .is_some_and(|v| !v.trim().is_empty())
            || std::env::var(env_var).is_ok_and(|v| !v.trim().is_empty())
    }

    /// The raw value. Call only where a request header is set.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}
