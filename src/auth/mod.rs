//! Pluggable authentication for the memory server.
//!
//! An ordered chain of credential providers inspects each inbound
//! request; the first provider that both claims and successfully
//! validates the request produces a normalized [`Session`]. With no
//! providers configured the chain grants anonymous access, which keeps
//! local stdio use frictionless.

pub mod config;
pub mod manager;
pub mod middleware;
pub mod providers;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use config::AuthConfig;
pub use manager::{AuthManager, AuthStatus};
pub use providers::{ApiKeyProvider, AuthProvider, OAuthProvider, TokenClaims, TokenIntrospector};

/// Credential scheme a provider implements.
///
/// Also used as the `type` of the [`Session`] it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OAuth,
    ApiKey,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OAuth => "oauth",
            ProviderType::ApiKey => "apikey",
        }
    }
}

/// Normalized result of a successful authentication.
///
/// Created fresh on every authenticated request by exactly one provider;
/// never persisted and never merged from multiple providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(rename = "type")]
    pub session_type: ProviderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Open-access session granted when no providers are configured
    pub fn anonymous() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_type: ProviderType::OAuth,
            user_id: Some("anonymous".to_string()),
            email: None,
            name: None,
            provider: None,
            scopes: vec!["read".to_string(), "write".to_string()],
            created_at: Utc::now(),
            expires_at: None,
        }
    }
}

/// Transport-neutral projection of one inbound request.
///
/// Header names are lowercased on insertion so lookups are
/// case-insensitive, matching HTTP header semantics.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_query_param(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Token carried as `Authorization: Bearer <token>`
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")?.strip_prefix("Bearer ")
    }

    /// Key carried as `Authorization: ApiKey <key>`, `x-api-key`, or the
    /// `api_key` query parameter, in that order
    pub fn api_key(&self) -> Option<&str> {
        if let Some(auth) = self.header("authorization") {
            if let Some(key) = auth.strip_prefix("ApiKey ") {
                return Some(key);
            }
        }
        self.header("x-api-key")
            .or_else(|| self.query_param("api_key"))
    }
}

/// Authentication failures.
///
/// Only [`AuthError::Rejected`] reaches callers of the chain; its message
/// is deliberately generic so a rejection does not reveal which scheme
/// turned the credential down.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication failed")]
    Rejected,

    #[error("no credentials supplied for this scheme")]
    MissingCredentials,

    #[error("credential rejected")]
    InvalidCredential,

    #[error("token introspection failed: {0}")]
    Introspection(String),
}
