use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;

use crate::{
    auth::services::{require_role, Principal, Role},
    error::AuthError,
    state::AppState,
};

/// Reads the session token from the session cookie, falling back to a
/// `Bearer` Authorization header.
pub(crate) fn session_token(parts: &Parts, cookie_name: &str) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(cookie_name) {
        return Some(cookie.value().to_owned());
    }

    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
}

/// Principal resolved for the current request; later extractors reuse it.
#[derive(Clone)]
struct ResolvedPrincipal(Option<Principal>);

async fn resolve(parts: &mut Parts, state: &AppState) -> Result<Option<Principal>, AuthError> {
    if let Some(ResolvedPrincipal(principal)) = parts.extensions.get::<ResolvedPrincipal>() {
        return Ok(principal.clone());
    }

    let principal = match session_token(parts, &state.config.session.cookie_name) {
        Some(token) => state
            .auth
            .resolve_session(&token)
            .await?
            .as_ref()
            .map(Principal::from),
        None => None,
    };

    parts
        .extensions
        .insert(ResolvedPrincipal(principal.clone()));
    Ok(principal)
}

/// Raw session token, if the caller sent one.
pub struct SessionToken(pub Option<String>);

#[async_trait]
impl FromRequestParts<AppState> for SessionToken {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(SessionToken(session_token(
            parts,
            &state.config.session.cookie_name,
        )))
    }
}

/// The caller's principal when logged in, `None` otherwise.
pub struct MaybeUser(pub Option<Principal>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve(parts, state).await?))
    }
}

/// Requires a logged-in caller.
pub struct CurrentUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = resolve(parts, state).await?;
        let principal = require_role(principal.as_ref(), Role::User)?;
        Ok(CurrentUser(principal.clone()))
    }
}

/// Requires a logged-in administrator.
pub struct AdminUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = resolve(parts, state).await?;
        let principal = require_role(principal.as_ref(), Role::Admin)?;
        Ok(AdminUser(principal.clone()))
    }
}
