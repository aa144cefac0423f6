use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use super::{AuthError, AuthRequest, ProviderType, Session};

/// Identity claims returned by the token-introspection backend
/// (RFC 7662 response shape).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    pub active: bool,
    /// Subject, mapped to the session's user id
    pub sub: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Upstream identity provider, e.g. "google"
    pub provider: Option<String>,
    /// Space-delimited scope string
    pub scope: Option<String>,
    /// Expiry as a unix timestamp
    pub exp: Option<i64>,
}

/// Validates a bearer token against an external backend.
///
/// Object-safe so the OAuth provider can be exercised without a live
/// endpoint.
#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    async fn introspect(&self, token: &str) -> Result<TokenClaims, AuthError>;
}

/// Production introspector: POSTs the token to the configured endpoint
/// as an RFC 7662 form and decodes the JSON claims.
pub struct HttpIntrospector {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpIntrospector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TokenIntrospector for HttpIntrospector {
    async fn introspect(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|err| AuthError::Introspection(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Introspection(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        response
            .json::<TokenClaims>()
            .await
            .map_err(|err| AuthError::Introspection(err.to_string()))
    }
}

/// Validates `Authorization: Bearer` credentials via token introspection
pub struct OAuthProvider {
    introspector: Arc<dyn TokenIntrospector>,
}

impl OAuthProvider {
    pub fn new(introspection_url: impl Into<String>) -> Self {
        Self {
            introspector: Arc::new(HttpIntrospector::new(introspection_url)),
        }
    }

    /// Swap in a different introspection backend
    pub fn with_introspector(introspector: Arc<dyn TokenIntrospector>) -> Self {
        Self { introspector }
    }

    pub fn can_handle(&self, request: &AuthRequest) -> bool {
        request.bearer_token().is_some()
    }

    pub async fn authenticate(&self, request: &AuthRequest) -> Result<Session, AuthError> {
        let token = request.bearer_token().ok_or(AuthError::MissingCredentials)?;
        self.validate_token(token).await
    }

    /// Introspect a raw token and build a session from its claims
    pub async fn validate_token(&self, token: &str) -> Result<Session, AuthError> {
        let claims = self.introspector.introspect(token).await?;
        if !claims.active {
            return Err(AuthError::InvalidCredential);
        }

        let scopes = match claims.scope.as_deref() {
            Some(scope) if !scope.trim().is_empty() => {
                scope.split_whitespace().map(str::to_string).collect()
            }
            _ => vec!["read".to_string(), "write".to_string()],
        };

        let expires_at: Option<DateTime<Utc>> =
            claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0));

        debug!(user = ?claims.sub, "bearer token accepted by introspection");

        Ok(Session {
            id: Uuid::new_v4().to_string(),
            session_type: ProviderType::OAuth,
            user_id: claims.sub,
            email: claims.email,
            name: claims.name,
            provider: claims.provider,
            scopes,
            created_at: Utc::now(),
            expires_at,
        })
    }
}

/// Validates API keys against a static allowlist supplied at startup
pub struct ApiKeyProvider {
    keys: HashSet<String>,
}

impl ApiKeyProvider {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn can_handle(&self, request: &AuthRequest) -> bool {
        request.api_key().is_some()
    }

    pub async fn authenticate(&self, request: &AuthRequest) -> Result<Session, AuthError> {
        let key = request.api_key().ok_or(AuthError::MissingCredentials)?;
        self.validate_key(key)
    }

    /// Check a raw key against the allowlist and mint a session for it
    pub fn validate_key(&self, key: &str) -> Result<Session, AuthError> {
        if !self.keys.contains(key) {
            return Err(AuthError::InvalidCredential);
        }

        // Identity for logging only; never more than a key prefix
        let prefix: String = key.chars().take(8).collect();

        Ok(Session {
            id: Uuid::new_v4().to_string(),
            session_type: ProviderType::ApiKey,
            user_id: Some(format!("api_user_{}", prefix)),
            email: None,
            name: None,
            provider: Some("api-key".to_string()),
            scopes: vec!["read".to_string(), "write".to_string()],
            created_at: Utc::now(),
            expires_at: None,
        })
    }
}

/// Closed set of credential providers.
///
/// The chain holds these in registration order; capability lookup is a
/// variant match, never runtime type inspection.
pub enum AuthProvider {
    OAuth(OAuthProvider),
    ApiKey(ApiKeyProvider),
}

impl AuthProvider {
    pub fn name(&self) -> &'static str {
        match self {
            AuthProvider::OAuth(_) => "oauth",
            AuthProvider::ApiKey(_) => "api-key",
        }
    }

    pub fn provider_type(&self) -> ProviderType {
        match self {
            AuthProvider::OAuth(_) => ProviderType::OAuth,
            AuthProvider::ApiKey(_) => ProviderType::ApiKey,
        }
    }

    /// Cheap, side-effect-free check for this scheme's request markers
    pub fn can_handle(&self, request: &AuthRequest) -> bool {
        match self {
            AuthProvider::OAuth(p) => p.can_handle(request),
            AuthProvider::ApiKey(p) => p.can_handle(request),
        }
    }

    pub async fn authenticate(&self, request: &AuthRequest) -> Result<Session, AuthError> {
        match self {
            AuthProvider::OAuth(p) => p.authenticate(request).await,
            AuthProvider::ApiKey(p) => p.authenticate(request).await,
        }
    }

    /// Re-validate an opaque session id (the credential itself) against
    /// this provider
    pub async fn validate_session(&self, id: &str) -> Option<Session> {
        match self {
            AuthProvider::OAuth(p) => p.validate_token(id).await.ok(),
            AuthProvider::ApiKey(p) => p.validate_key(id).ok(),
        }
    }
}
