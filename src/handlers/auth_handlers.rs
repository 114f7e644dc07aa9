//! Account handlers under `/auth`, delegating to the identity provider.

use crate::{
    errors::{AppError, USER_NOT_FOUND},
    state::AppState,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsReq {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl CredentialsReq {
    fn required(self) -> Result<(String, String), AppError> {
        match (self.email, self.password) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Ok((email, password))
            }
            _ => Err(AppError::validation("Email and password are required")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Option<String>,
    pub email: Option<String>,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub id: String,
    pub email: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// `POST /auth/register`
///
/// 201 when the provider opened a session right away, 200 when the account
/// still awaits confirmation.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let (email, password) = req.required()?;

    let outcome = state.identity.sign_up(&email, &password).await?;
    let (id, email) = match outcome.user {
        Some(user) => (Some(user.id), Some(user.email)),
        None => (None, None),
    };

    let (status, message) = if outcome.session.is_some() {
        (StatusCode::CREATED, "User registered successfully")
    } else {
        (
            StatusCode::OK,
            "Confirmation email sent. Please check your inbox.",
        )
    };

    Ok((status, Json(RegisterResponse { id, email, message })))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsReq>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(req) = payload?;
    let (email, password) = req.required()?;

    let outcome = state.identity.sign_in(&email, &password).await?;
    let user = outcome.user.ok_or_else(|| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            USER_NOT_FOUND,
            "User login failed, no user data returned",
        )
    })?;

    tracing::info!(user_id = %user.id, "user logged in");
    let (access_token, refresh_token) = match outcome.session {
        Some(session) => (Some(session.access_token), Some(session.refresh_token)),
        None => (None, None),
    };

    Ok(Json(LoginResponse {
        success: true,
        id: user.id,
        email: user.email,
        access_token,
        refresh_token,
    }))
}
