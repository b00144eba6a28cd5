use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use skiff_model::{User, UserId};

use crate::infra::app_state::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer_token(&request).ok_or(StatusCode::UNAUTHORIZED)?;
    let user = validate_and_get_user(&state, &token)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// The principal on routes that serve both authenticated and anonymous
/// callers. Always present in extensions behind `optional_auth_middleware`.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

/// Attaches the user when a valid bearer token is present, but lets the
/// request through either way. Routes that serve public content use this.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut resolved = None;
    if let Some(token) = extract_bearer_token(&request)
        && let Some(user) = validate_and_get_user(&state, &token).await
    {
        request.extensions_mut().insert(user.clone());
        resolved = Some(user);
    }
    request.extensions_mut().insert(MaybeUser(resolved));
    next.run(request).await
}

/// Must run after `auth_middleware`; rejects non-admin principals.
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    match request.extensions().get::<User>() {
        Some(user) if user.is_admin => Ok(next.run(request).await),
        Some(_) => Err(StatusCode::FORBIDDEN),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

pub async fn validate_and_get_user(state: &AppState, token: &str) -> Option<User> {
    let claims = state.jwt.verify(token).ok()?;
    let user = state
        .db
        .users
        .get_by_id(UserId(claims.sub))
        .await
        .ok()
        .flatten()?;
    // Deactivation beats any still-valid token.
    user.is_active.then_some(user)
}

/// Best-effort client address for audit records, honouring the usual proxy
/// headers.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
