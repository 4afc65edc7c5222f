use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, info, warn};

use crate::{auth::jwt::JwtKeys, error::AppError, state::AppState, users::repo_types::User};

pub const TOKEN_COOKIE: &str = "jwt";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Bearer header first, then the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| cookie_value(headers, TOKEN_COOKIE))
}

/// Resolve a request's credentials to a live user.
///
/// `NoToken -> TokenPresent -> Verified -> UserResolved -> Active`; each
/// arrow can fail with its own error.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let token = extract_token(headers).ok_or(AppError::NotAuthenticated)?;

    let verified = JwtKeys::from_ref(state).verify(token)?;

    let user = state
        .users
        .find_by_id(verified.user_id)
        .await?
        .ok_or(AppError::UserGone)?;

    if user.changed_password_after(verified.issued_at_ms) {
        warn!(user_id = %user.id, "token predates password change");
        return Err(AppError::StalePassword);
    }

    Ok(user)
}

/// The authenticated caller. Reuses the user cached by [`protect`] when present.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(cached) = parts.extensions.get::<CurrentUser>() {
            return Ok(cached.clone());
        }
        let user = authenticate(state, &parts.headers).await?;
        Ok(CurrentUser(user))
    }
}

/// Soft variant for page rendering: any failure means "anonymous".
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(CurrentUser(user)) = parts.extensions.get::<CurrentUser>() {
            return Ok(MaybeUser(Some(user.clone())));
        }
        match authenticate(state, &parts.headers).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(e) => {
                debug!(reason = e.kind(), "treating request as anonymous");
                Ok(MaybeUser(None))
            }
        }
    }
}

/// Middleware: reject unauthenticated requests and cache the user for
/// downstream guards and extractors.
pub async fn protect(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, req.headers()).await?;
    info!(user_id = %user.id, role = %user.role, "request authenticated");
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}
