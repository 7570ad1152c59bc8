use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use kindred_types::api::{Claims, TokenType};

use crate::auth::decode_token;
use crate::error::ApiError;
use crate::{AppState, blocking};

/// Bearer token from the Authorization header.
fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// `token` query parameter. Browsers cannot set headers on a WebSocket upgrade.
fn query_token(req: &Request) -> Option<String> {
    req.uri().query()?.split('&').find_map(|pair| match pair.split_once('=') {
        Some(("token", value)) => Some(value.to_string()),
        _ => None,
    })
}

/// Validate the access token and stash its [`Claims`] in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req);
    authenticate(&state, token, req, next).await
}

/// [`require_auth`] for the WebSocket upgrade, which also accepts the `token` query
/// parameter when no Authorization header is sent.
pub async fn require_socket_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = if req.headers().contains_key(header::AUTHORIZATION) {
        bearer_token(&req)
    } else {
        query_token(&req)
    };
    authenticate(&state, token, req, next).await
}

async fn authenticate(
    state: &AppState,
    token: Option<String>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Authorization header required".into()))?;

    let claims = decode_token(&state.settings.jwt_secret, &token)?;
    if claims.token_type != TokenType::Access {
        return Err(ApiError::Unauthorized("Invalid token type".into()));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Must run after [`require_auth`]. Rejects users without an active admin role.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = req
        .extensions()
        .get::<Claims>()
        .map(|c| c.sub)
        .ok_or_else(|| ApiError::Unauthorized("User not authenticated".into()))?;

    let db = state.db.clone();
    let role = blocking(move || db.admin_role(user_id)).await?;
    match role {
        Some(admin) => {
            debug!("admin {} ({}) -> {}", user_id, admin.role, req.uri().path());
            Ok(next.run(req).await)
        }
        None => Err(ApiError::Forbidden("Admin access required".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, auth: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_header_is_read() {
        let req = request("/users/profile", Some("Bearer from-header"));
        assert_eq!(bearer_token(&req).as_deref(), Some("from-header"));
        assert_eq!(bearer_token(&request("/users/profile", None)), None);
    }

    #[test]
    fn query_token_is_only_read_on_request() {
        let req = request("/ws?x=1&token=abc", None);
        assert_eq!(query_token(&req).as_deref(), Some("abc"));
        assert_eq!(bearer_token(&req), None);
        assert_eq!(query_token(&request("/ws", None)), None);
    }

    #[test]
    fn non_bearer_scheme_is_ignored() {
        let req = request("/ws?token=abc", Some("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&req), None);
    }
}
