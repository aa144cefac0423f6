use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use graph_memory_mcp_rs::auth::{
    ApiKeyProvider, AuthError, AuthManager, AuthProvider, AuthRequest, OAuthProvider,
    ProviderType, TokenClaims, TokenIntrospector,
};

/// Introspection backend serving a fixed set of tokens
struct StaticIntrospector {
    tokens: HashMap<String, TokenClaims>,
}

impl StaticIntrospector {
    fn new(tokens: Vec<(&str, TokenClaims)>) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens
                .into_iter()
                .map(|(token, claims)| (token.to_string(), claims))
                .collect(),
        })
    }
}

#[async_trait]
impl TokenIntrospector for StaticIntrospector {
    async fn introspect(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::Introspection("unknown token".to_string()))
    }
}

fn alice_claims() -> TokenClaims {
    TokenClaims {
        active: true,
        sub: Some("user-42".to_string()),
        email: Some("alice@example.com".to_string()),
        name: Some("Alice".to_string()),
        provider: Some("google".to_string()),
        scope: Some("read write".to_string()),
        exp: Some(4_102_444_800), // far future
    }
}

fn oauth_provider(tokens: Vec<(&str, TokenClaims)>) -> AuthProvider {
    AuthProvider::OAuth(OAuthProvider::with_introspector(StaticIntrospector::new(
        tokens,
    )))
}

fn api_key_provider(keys: &[&str]) -> AuthProvider {
    AuthProvider::ApiKey(ApiKeyProvider::new(
        keys.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
    ))
}

#[tokio::test]
async fn test_anonymous_mode_with_no_providers() {
    let manager = AuthManager::new(Vec::new());

    let session = manager.authenticate(&AuthRequest::new()).await.unwrap();
    assert_eq!(session.session_type, ProviderType::OAuth);
    assert_eq!(session.user_id.as_deref(), Some("anonymous"));
    assert_eq!(session.scopes, vec!["read", "write"]);

    // Every request mints a fresh session
    let other = manager.authenticate(&AuthRequest::new()).await.unwrap();
    assert_ne!(session.id, other.id);
}

#[tokio::test]
async fn test_api_key_via_header() {
    let manager = AuthManager::new(vec![api_key_provider(&["key-1"])]);

    let request = AuthRequest::new().with_header("x-api-key", "key-1");
    let session = manager.authenticate(&request).await.unwrap();
    assert_eq!(session.session_type, ProviderType::ApiKey);
    assert_eq!(session.provider.as_deref(), Some("api-key"));
}

#[tokio::test]
async fn test_api_key_via_authorization_scheme() {
    let manager = AuthManager::new(vec![api_key_provider(&["key-1"])]);

    let request = AuthRequest::new().with_header("authorization", "ApiKey key-1");
    let session = manager.authenticate(&request).await.unwrap();
    assert_eq!(session.session_type, ProviderType::ApiKey);
}

#[tokio::test]
async fn test_api_key_via_query_param() {
    let manager = AuthManager::new(vec![api_key_provider(&["key-1"])]);

    let request = AuthRequest::new().with_query_param("api_key", "key-1");
    let session = manager.authenticate(&request).await.unwrap();
    assert_eq!(session.session_type, ProviderType::ApiKey);
}

#[tokio::test]
async fn test_unknown_api_key_is_rejected_generically() {
    let manager = AuthManager::new(vec![api_key_provider(&["key-1"])]);

    let request = AuthRequest::new().with_header("x-api-key", "wrong");
    let err = manager.authenticate(&request).await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected));
    assert_eq!(err.to_string(), "authentication failed");
}

#[tokio::test]
async fn test_oauth_bearer_token_maps_claims() {
    let manager = AuthManager::new(vec![oauth_provider(vec![("tok-1", alice_claims())])]);

    let request = AuthRequest::new().with_header("authorization", "Bearer tok-1");
    let session = manager.authenticate(&request).await.unwrap();

    assert_eq!(session.session_type, ProviderType::OAuth);
    assert_eq!(session.user_id.as_deref(), Some("user-42"));
    assert_eq!(session.email.as_deref(), Some("alice@example.com"));
    assert_eq!(session.name.as_deref(), Some("Alice"));
    assert_eq!(session.provider.as_deref(), Some("google"));
    assert_eq!(session.scopes, vec!["read", "write"]);
    assert!(session.expires_at.is_some());
}

#[tokio::test]
async fn test_inactive_token_is_rejected() {
    let inactive = TokenClaims {
        active: false,
        ..alice_claims()
    };
    let manager = AuthManager::new(vec![oauth_provider(vec![("tok-1", inactive)])]);

    let request = AuthRequest::new().with_header("authorization", "Bearer tok-1");
    let err = manager.authenticate(&request).await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected));
}

#[tokio::test]
async fn test_api_key_succeeds_without_bearer_header() {
    // Both providers configured, request carries only an API key: the
    // OAuth provider never claims it and the key authenticates
    let manager = AuthManager::new(vec![
        oauth_provider(vec![("tok-1", alice_claims())]),
        api_key_provider(&["key-1"]),
    ]);

    let request = AuthRequest::new().with_header("x-api-key", "key-1");
    let session = manager.authenticate(&request).await.unwrap();
    assert_eq!(session.session_type, ProviderType::ApiKey);
}

#[tokio::test]
async fn test_invalid_bearer_falls_back_to_valid_api_key() {
    let manager = AuthManager::new(vec![
        oauth_provider(vec![("tok-1", alice_claims())]),
        api_key_provider(&["key-1"]),
    ]);

    // Bearer token is garbage but the API key is good: provider order
    // does not block the fallback
    let request = AuthRequest::new()
        .with_header("authorization", "Bearer garbage")
        .with_header("x-api-key", "key-1");
    let session = manager.authenticate(&request).await.unwrap();
    assert_eq!(session.session_type, ProviderType::ApiKey);
}

#[tokio::test]
async fn test_no_credentials_with_providers_configured_is_rejected() {
    let manager = AuthManager::new(vec![
        oauth_provider(vec![("tok-1", alice_claims())]),
        api_key_provider(&["key-1"]),
    ]);

    let err = manager.authenticate(&AuthRequest::new()).await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected));
}

#[tokio::test]
async fn test_auth_status_projection() {
    let manager = AuthManager::new(vec![
        oauth_provider(vec![("tok-1", alice_claims())]),
        api_key_provider(&["key-1"]),
    ]);

    let status = manager.status();
    assert!(status.oauth_configured);
    assert!(status.api_key_configured);
    assert_eq!(status.providers, vec!["oauth", "api-key"]);

    let empty = AuthManager::new(Vec::new()).status();
    assert!(!empty.oauth_configured);
    assert!(!empty.api_key_configured);
    assert!(empty.providers.is_empty());
}

#[tokio::test]
async fn test_validate_session_against_each_provider() {
    let manager = AuthManager::new(vec![
        oauth_provider(vec![("tok-1", alice_claims())]),
        api_key_provider(&["key-1"]),
    ]);

    let session = manager.validate_session("tok-1", None).await.unwrap();
    assert_eq!(session.session_type, ProviderType::OAuth);

    let session = manager.validate_session("key-1", None).await.unwrap();
    assert_eq!(session.session_type, ProviderType::ApiKey);

    assert!(manager.validate_session("nonsense", None).await.is_none());
}

#[tokio::test]
async fn test_validate_session_respects_provider_type_filter() {
    let manager = AuthManager::new(vec![
        oauth_provider(vec![("tok-1", alice_claims())]),
        api_key_provider(&["key-1"]),
    ]);

    assert!(manager
        .validate_session("key-1", Some(ProviderType::ApiKey))
        .await
        .is_some());
    assert!(manager
        .validate_session("key-1", Some(ProviderType::OAuth))
        .await
        .is_none());
}

#[tokio::test]
async fn test_sessions_are_not_merged_across_providers() {
    // A request valid for both schemes authenticates via the first
    // provider in registration order only
    let manager = AuthManager::new(vec![
        oauth_provider(vec![("tok-1", alice_claims())]),
        api_key_provider(&["key-1"]),
    ]);

    let request = AuthRequest::new()
        .with_header("authorization", "Bearer tok-1")
        .with_header("x-api-key", "key-1");
    let session = manager.authenticate(&request).await.unwrap();

    assert_eq!(session.session_type, ProviderType::OAuth);
    assert_eq!(session.user_id.as_deref(), Some("user-42"));
}
