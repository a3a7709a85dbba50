//! Environment configuration.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `CALLAI_API_KEY` / `OPENROUTER_API_KEY` | default API key |
//! | `CALLAI_CHAT_URL` | chat-completions endpoint |
//! | `CALLAI_REFRESH_ENDPOINT` | key refresh service |
//! | `CALLAI_REFRESH_TOKEN` | bearer token for the refresh service |
//! | `CALLAI_PROXY_MANAGED` | send a placeholder key and let a proxy inject the real one |
//! | `CALLAI_REFERER`, `CALLAI_TITLE` | provider attribution headers |

use crate::options::SecretString;

pub const DEFAULT_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Placeholder key sent when a proxy manages credentials.
pub const PROXY_MANAGED_KEY: &str = "sk-proxy-managed";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api_key: Option<SecretString>,
    pub chat_url: Option<String>,
    pub refresh_endpoint: Option<String>,
    pub refresh_token: Option<SecretString>,
    pub proxy_managed: bool,
    pub referer: Option<String>,
    pub title: Option<String>,
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("no .env loaded: {e}");
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            api_key: get("CALLAI_API_KEY")
                .or_else(|| get("OPENROUTER_API_KEY"))
                .map(SecretString::new),
            chat_url: get("CALLAI_CHAT_URL"),
            refresh_endpoint: get("CALLAI_REFRESH_ENDPOINT"),
            refresh_token: get("CALLAI_REFRESH_TOKEN").map(SecretString::new),
            proxy_managed: get("CALLAI_PROXY_MANAGED").is_some_and(|v| is_truthy(&v)),
            referer: get("CALLAI_REFERER"),
            title: get("CALLAI_TITLE"),
        }
    }

    pub fn chat_url(&self) -> &str {
        self.chat_url.as_deref().unwrap_or(DEFAULT_CHAT_URL)
    }

    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_chat_url(mut self, chat_url: impl Into<String>) -> Self {
        self.chat_url = Some(chat_url.into());
        self
    }

    pub fn with_proxy_managed(mut self, proxy_managed: bool) -> Self {
        self.proxy_managed = proxy_managed;
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = config_from(&[]);
        assert!(config.api_key.is_none());
        assert!(!config.proxy_managed);
        assert_eq!(config.chat_url(), DEFAULT_CHAT_URL);
    }

    #[test]
    fn test_api_key_fallback_and_blank_values() {
        let config = config_from(&[("CALLAI_API_KEY", "  "), ("OPENROUTER_API_KEY", "sk-or")]);
        assert_eq!(config.api_key.unwrap().expose_secret(), "sk-or");

        let config = config_from(&[("CALLAI_API_KEY", "sk-a"), ("OPENROUTER_API_KEY", "sk-or")]);
        assert_eq!(config.api_key.unwrap().expose_secret(), "sk-a");
    }

    #[test]
    fn test_proxy_managed_flag() {
        assert!(config_from(&[("CALLAI_PROXY_MANAGED", "TRUE")]).proxy_managed);
        assert!(!config_from(&[("CALLAI_PROXY_MANAGED", "0")]).proxy_managed);
    }

    #[test]
    fn test_chat_url_override() {
        let config = config_from(&[("CALLAI_CHAT_URL", "http://localhost:9000/v1/chat")]);
        assert_eq!(config.chat_url(), "http://localhost:9000/v1/chat");
    }

    #[test]
    fn test_refresh_settings() {
        let config = config_from(&[
            ("CALLAI_REFRESH_ENDPOINT", "https://keys.example.test/refresh"),
            ("CALLAI_REFRESH_TOKEN", "rt-1"),
        ]);
        assert_eq!(
            config.refresh_endpoint.as_deref(),
            Some("https://keys.example.test/refresh")
        );
        assert_eq!(config.refresh_token.unwrap().expose_secret(), "rt-1");

        let legacy = config_from(&[("CALL_AI_REFRESH_TOKEN", "rt-1")]);
        assert!(legacy.refresh_token.is_none());
    }
}
