use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::{AuthManager, AuthRequest};

/// Generic 401 returned for every authentication failure.
///
/// The body never indicates which scheme rejected the request.
#[derive(Debug)]
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "authentication_failed",
                "message": "Authentication failed"
            })),
        )
            .into_response()
    }
}

/// Axum middleware running the credential chain on each request.
///
/// On success the session is attached to the request extensions and the
/// identity is logged; it is not used for row-level authorization, the
/// graph is shared.
pub async fn require_auth(
    State(auth): State<Arc<AuthManager>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthRejection> {
    let auth_request = auth_request_from_http(request.headers(), request.uri().query());

    match auth.authenticate(&auth_request).await {
        Ok(session) => {
            debug!(
                session_id = %session.id,
                session_type = session.session_type.as_str(),
                user = ?session.user_id,
                "request authenticated"
            );
            request.extensions_mut().insert(session);
            Ok(next.run(request).await)
        }
        Err(err) => {
            warn!(error = %err, "rejecting unauthenticated request");
            Err(AuthRejection)
        }
    }
}

/// Project HTTP headers and the raw query string into an [`AuthRequest`]
fn auth_request_from_http(headers: &HeaderMap, query: Option<&str>) -> AuthRequest {
    let mut request = AuthRequest::new();

    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((name, value)) = pair.split_once('=') {
                request = request.with_query_param(name, value);
            }
        }
    }

    request
}
