use crate::{
    auth::jwt::JwtSessionService,
    error::{ChatError, ErrorCode},
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use lectern_common::types::Principal;

/// The verified identity attached to HTTP requests that pass
/// [`require_bearer_auth`]. Handlers read it via `Extension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal(pub Principal);

pub async fn require_bearer_auth(
    State(jwt_service): State<Arc<JwtSessionService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token,
        None => return unauthorized_response("missing bearer token"),
    };

    let principal = match jwt_service.validate_session_token(token) {
        Ok(principal) => principal,
        Err(_) => return unauthorized_response("invalid bearer token"),
    };

    request.extensions_mut().insert(AuthenticatedPrincipal(principal));

    next.run(request).await
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    ChatError::new(ErrorCode::AuthInvalidToken, message).into_response()
}
