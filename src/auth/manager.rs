use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::providers::{ApiKeyProvider, AuthProvider, OAuthProvider};
use super::{AuthConfig, AuthError, AuthRequest, ProviderType, Session};

/// Read-only projection of the configured provider chain
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub oauth_configured: bool,
    pub api_key_configured: bool,
    pub providers: Vec<String>,
}

/// Ordered chain of credential providers.
///
/// Per request the chain walks its providers in registration order and
/// asks each one that claims the request to authenticate it. A provider
/// failure falls through to the next provider, so a request carrying a
/// malformed bearer token can still succeed via an API key. With no
/// providers configured every request gets an anonymous session.
///
/// The provider list is owned and constructor-injected; it is set up at
/// startup and read-only during traffic. `add_provider`/`remove_provider`
/// are administrative and not expected to race authentication.
pub struct AuthManager {
    providers: Vec<AuthProvider>,
}

impl AuthManager {
    pub fn new(providers: Vec<AuthProvider>) -> Self {
        Self { providers }
    }

    /// Build the chain from static configuration. The OAuth provider, if
    /// configured, registers ahead of the API-key provider.
    pub fn from_config(config: &AuthConfig) -> Self {
        if config.is_empty() {
            debug!("Auth configuration is empty, every request will get an anonymous session");
            return Self::new(Vec::new());
        }

        let mut providers = Vec::new();

        if let Some(url) = &config.oauth_introspection_url {
            providers.push(AuthProvider::OAuth(OAuthProvider::new(url.clone())));
        }
        if !config.api_keys.is_empty() {
            providers.push(AuthProvider::ApiKey(ApiKeyProvider::new(
                config.api_keys.iter().cloned(),
            )));
        }

        Self::new(providers)
    }

    pub fn add_provider(&mut self, provider: AuthProvider) {
        self.providers.push(provider);
    }

    /// Remove every provider of the given type; true when any was removed
    pub fn remove_provider(&mut self, provider_type: ProviderType) -> bool {
        let before = self.providers.len();
        self.providers.retain(|p| p.provider_type() != provider_type);
        self.providers.len() != before
    }

    /// Authenticate one request, producing a session or a rejection.
    ///
    /// The rejection is generic: which provider turned the request down is
    /// logged but never surfaced, to avoid credential-probing oracles.
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<Session, AuthError> {
        if self.providers.is_empty() {
            debug!("No auth providers configured, granting anonymous session");
            return Ok(Session::anonymous());
        }

        for provider in &self.providers {
            if !provider.can_handle(request) {
                continue;
            }
            match provider.authenticate(request).await {
                Ok(session) => {
                    debug!(
                        provider = provider.name(),
                        user = ?session.user_id,
                        "request authenticated"
                    );
                    return Ok(session);
                }
                Err(err) => {
                    // Fall through: another scheme's credential may still work
                    warn!(
                        provider = provider.name(),
                        error = %err,
                        "provider rejected request, trying next"
                    );
                }
            }
        }

        Err(AuthError::Rejected)
    }

    /// Booleans for configured schemes plus the ordered provider names
    pub fn status(&self) -> AuthStatus {
        AuthStatus {
            oauth_configured: self
                .providers
                .iter()
                .any(|p| p.provider_type() == ProviderType::OAuth),
            api_key_configured: self
                .providers
                .iter()
                .any(|p| p.provider_type() == ProviderType::ApiKey),
            providers: self.providers.iter().map(|p| p.name().to_string()).collect(),
        }
    }

    /// Re-validate an opaque session id against one provider type, or
    /// against every provider in order when no type is given
    pub async fn validate_session(
        &self,
        id: &str,
        provider_type: Option<ProviderType>,
    ) -> Option<Session> {
        for provider in &self.providers {
            if let Some(wanted) = provider_type {
                if provider.provider_type() != wanted {
                    continue;
                }
            }
            if let Some(session) = provider.validate_session(id).await {
                return Some(session);
            }
        }
        None
    }
}
