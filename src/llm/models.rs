//! Built-in defaults for each supported provider

use crate::state::ProviderKind;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-provider connection defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDefaults {
    pub display_name: &'static str,
    pub base_url: &'static str,
    pub model: &'static str,
    /// Key used when none is configured; `None` means one is required
    pub api_key: Option<&'static str>,
    /// Environment variable the key is read from
    pub api_key_env_var: &'static str,
}

impl ProviderDefaults {
    pub fn for_kind(kind: ProviderKind) -> &'static Self {
        match kind {
            ProviderKind::LmStudio => &LM_STUDIO,
            ProviderKind::OpenAI => &OPENAI,
        }
    }
}

const LM_STUDIO: ProviderDefaults = ProviderDefaults {
    display_name: "LM Studio",
    base_url: "http://localhost:1234/v1",
    model: "gemma-3n-e4b-it",
    // LM Studio accepts any bearer token
    api_key: Some("lm-studio"),
    api_key_env_var: "OPENAI_API_KEY",
};

const OPENAI: ProviderDefaults = ProviderDefaults {
    display_name: "OpenAI",
    base_url: "https://api.openai.com/v1",
    model: "gpt-4o-mini",
    api_key: None,
    api_key_env_var: "OPENAI_API_KEY",
};
