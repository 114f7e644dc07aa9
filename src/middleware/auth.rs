//! Bearer-token authentication.
//!
//! `require_auth` verifies `Authorization: Bearer <token>` with the identity
//! provider and attaches the resolved [`AuthUser`] to the request. Handlers
//! read it back through [`TokenOwner`], which is empty on routes the
//! middleware does not guard.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use tracing::debug;

/// The verified user id of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .map(str::to_owned)
        .ok_or_else(|| AppError::unauthorized("No token provided"))?;

    let user_id = state.identity.verify_token(&token).await.map_err(|err| {
        debug!("token rejected: {}", err);
        AppError::unauthorized("Invalid token")
    })?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// The authenticated user, if `require_auth` ran for this request.
#[derive(Debug, Clone, Default)]
pub struct TokenOwner(pub Option<AuthUser>);

impl TokenOwner {
    /// Decide which `ownerId` an operation runs as.
    ///
    /// Unauthenticated requests use the supplied id as-is. Authenticated
    /// requests run as the token's user; a supplied id must match it.
    pub fn resolve(&self, supplied: Option<String>) -> Result<String, AppError> {
        let supplied = supplied.filter(|id| !id.trim().is_empty());
        match (&self.0, supplied) {
            (None, supplied) => Ok(supplied.unwrap_or_default()),
            (Some(AuthUser(user_id)), None) => Ok(user_id.clone()),
            (Some(AuthUser(user_id)), Some(id)) if id == *user_id => Ok(id),
            (Some(_), Some(_)) => Err(AppError::unauthorized(
                "ownerId does not match the authenticated user",
            )),
        }
    }
}

impl<S> FromRequestParts<S> for TokenOwner
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(TokenOwner(parts.extensions.get::<AuthUser>().cloned()))
    }
}
