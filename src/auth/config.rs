use serde::{Deserialize, Serialize};

/// Environment variable holding the comma-delimited API-key allowlist
pub const API_KEYS_ENV: &str = "MEMORY_API_KEYS";

/// Environment variable holding the OAuth token-introspection endpoint
pub const OAUTH_INTROSPECTION_ENV: &str = "MEMORY_OAUTH_INTROSPECTION_URL";

/// Static authentication configuration, read once at process start.
///
/// Credentials themselves live outside the process: API keys are an
/// allowlist handed in via the environment, OAuth tokens are validated
/// by the external introspection endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted API keys; empty disables the API-key provider
    pub api_keys: Vec<String>,
    /// Token-introspection endpoint; absent disables the OAuth provider
    pub oauth_introspection_url: Option<String>,
}

impl AuthConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        let api_keys = std::env::var(API_KEYS_ENV)
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();

        let oauth_introspection_url = std::env::var(OAUTH_INTROSPECTION_ENV)
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        Self {
            api_keys,
            oauth_introspection_url,
        }
    }

    /// True when no provider would be configured from this config
    pub fn is_empty(&self) -> bool {
        self.api_keys.is_empty() && self.oauth_introspection_url.is_none()
    }
}

fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_list_trims_and_drops_empties() {
        assert_eq!(
            parse_key_list(" key-a , key-b ,, key-c,"),
            vec!["key-a", "key-b", "key-c"]
        );
    }

    #[test]
    fn test_parse_key_list_empty_input() {
        assert!(parse_key_list("").is_empty());
        assert!(parse_key_list(" , ,").is_empty());
    }

    #[test]
    fn test_default_config_is_empty() {
        assert!(AuthConfig::default().is_empty());
    }
}
