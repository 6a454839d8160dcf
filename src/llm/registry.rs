//! Provider configuration and construction

use super::models::{ProviderDefaults, DEFAULT_TIMEOUT};
use super::retry::DEFAULT_MAX_RETRIES;
use super::{LlmError, LoggingProvider, OpenAIProvider, Provider};
use crate::state::ProviderKind;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    UnknownProvider(String),

    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{provider} requires {var}")]
    MissingApiKey {
        provider: &'static str,
        var: &'static str,
    },

    #[error("failed to create provider: {0}")]
    Client(#[from] LlmError),
}

/// Configuration for LLM providers, as read from the environment
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    /// Default model; the provider's built-in default when unset
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let provider = match get("TAI_PROVIDER") {
            Some(p) => p.parse().map_err(ConfigError::UnknownProvider)?,
            None => ProviderKind::default(),
        };
        let key_var = ProviderDefaults::for_kind(provider).api_key_env_var;

        let timeout = parse_number(&get, "TAI_TIMEOUT_SECS")?.map(Duration::from_secs);
        let max_retries = parse_number(&get, "TAI_MAX_RETRIES")?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));

        Ok(Self {
            provider,
            model: get("TAI_MODEL"),
            base_url: get("TAI_BASE_URL"),
            api_key: get(key_var),
            timeout,
            max_retries,
        })
    }

    /// Fill unset fields from the provider defaults
    pub fn resolve(&self) -> Result<ProviderConfig, ConfigError> {
        let defaults = ProviderDefaults::for_kind(self.provider);

        let api_key = match (&self.api_key, defaults.api_key) {
            (Some(key), _) => key.clone(),
            (None, Some(key)) => key.to_string(),
            (None, None) => {
                return Err(ConfigError::MissingApiKey {
                    provider: defaults.display_name,
                    var: defaults.api_key_env_var,
                })
            }
        };

        Ok(ProviderConfig {
            api_key,
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| defaults.base_url.to_string()),
            default_model: self
                .model
                .clone()
                .unwrap_or_else(|| defaults.model.to_string()),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        })
    }
}

/// Fully resolved connection settings for one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    /// Per-request timeout for blocking calls, and connect timeout for streams
    pub timeout: Duration,
    /// Zero means the default
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

/// Construct the configured provider, wrapped with request logging
pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    let resolved = config.resolve()?;
    tracing::info!(
        provider = %config.provider,
        base_url = %resolved.base_url,
        model = %resolved.default_model,
        "Configured LLM provider"
    );
    let provider = OpenAIProvider::new(config.provider, resolved)?;
    Ok(Arc::new(LoggingProvider::new(Arc::new(provider))))
}

fn parse_number<F>(get: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { var, value })
        })
        .transpose()
}
